//! Event routing: typed handler seams and the per-connection dispatcher.
//!
//! The dispatcher is pure routing plus error translation. Side effects live in
//! the handlers (which talk to the repository collaborators); fan-out lives in
//! `ws::broadcast`. A bad frame or an unknown resource never tears the
//! connection down — only an unexpected (`Internal`) failure inside a command
//! handler does.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DomainError;
use crate::ws::broadcast;
use crate::ws::protocol::{Broadcast, Command, CommandAction, Event, Query};
use crate::ws::registry::{ConnectionRegistry, Session, CLOSE_SERVER_ERROR};

fn unimplemented_action(action: CommandAction) -> DomainError {
    DomainError::Validation(format!(
        "command action {:?} not implemented for this resource",
        action.as_str()
    ))
}

/// A write handler for one resource. Implement only the actions the resource
/// supports; the defaults reply an explicit unimplemented-action error and
/// produce no broadcasts.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn create(
        &self,
        _command: &Command,
        _session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        Err(unimplemented_action(CommandAction::Create))
    }

    async fn update(
        &self,
        _command: &Command,
        _session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        Err(unimplemented_action(CommandAction::Update))
    }

    async fn delete(
        &self,
        _command: &Command,
        _session: &Session,
    ) -> Result<Vec<Broadcast>, DomainError> {
        Err(unimplemented_action(CommandAction::Delete))
    }
}

/// A read handler for one resource. The handler replies directly on the
/// session; there is no implicit reply.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError>;
}

/// A connect/disconnect hook. Command-shaped: it returns broadcasts that are
/// delivered exactly like a command handler's.
#[async_trait]
pub trait LifecycleHandler: Send + Sync {
    async fn handle(&self, session: &Session) -> Result<Vec<Broadcast>, DomainError>;
}

/// Resource-name → handler tables. Populated once at startup, immutable after
/// being wrapped in an `Arc`.
#[derive(Default)]
pub struct HandlerRegistry {
    commands: HashMap<String, Arc<dyn CommandHandler>>,
    queries: HashMap<String, Arc<dyn QueryHandler>>,
    on_connect: Option<Arc<dyn LifecycleHandler>>,
    on_disconnect: Option<Arc<dyn LifecycleHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_command(&mut self, resource: &str, handler: Arc<dyn CommandHandler>) {
        self.commands.insert(resource.to_string(), handler);
    }

    pub fn register_query(&mut self, resource: &str, handler: Arc<dyn QueryHandler>) {
        self.queries.insert(resource.to_string(), handler);
    }

    pub fn set_on_connect(&mut self, handler: Arc<dyn LifecycleHandler>) {
        self.on_connect = Some(handler);
    }

    pub fn set_on_disconnect(&mut self, handler: Arc<dyn LifecycleHandler>) {
        self.on_disconnect = Some(handler);
    }

    pub fn command(&self, resource: &str) -> Option<Arc<dyn CommandHandler>> {
        self.commands.get(resource).cloned()
    }

    pub fn query(&self, resource: &str) -> Option<Arc<dyn QueryHandler>> {
        self.queries.get(resource).cloned()
    }
}

/// What the read loop should do after a frame has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    Close,
}

/// Routes decoded events for one connection.
#[derive(Clone)]
pub struct Dispatcher {
    handlers: Arc<HandlerRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl Dispatcher {
    pub fn new(handlers: Arc<HandlerRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            handlers,
            connections,
        }
    }

    pub async fn dispatch(&self, event: Event, session: &Session) -> DispatchOutcome {
        match event {
            Event::Query(query) => self.dispatch_query(query, session).await,
            Event::Command(command) => self.dispatch_command(command, session).await,
        }
    }

    async fn dispatch_query(&self, query: Query, session: &Session) -> DispatchOutcome {
        let Some(handler) = self.handlers.query(&query.resource) else {
            session.send_fail(&invalid_resource(&query.resource));
            return DispatchOutcome::Continue;
        };

        if let Err(err) = handler.handle(&query, session).await {
            // Query failures never close the connection, not even unexpected
            // ones.
            tracing::warn!(
                user_id = session.user_id,
                resource = %query.resource,
                error = %err,
                "query handler failed"
            );
            session.send_fail(&err);
        }
        DispatchOutcome::Continue
    }

    async fn dispatch_command(&self, command: Command, session: &Session) -> DispatchOutcome {
        let Some(handler) = self.handlers.command(&command.resource) else {
            session.send_fail(&invalid_resource(&command.resource));
            return DispatchOutcome::Continue;
        };

        let result = match command.action {
            CommandAction::Create => handler.create(&command, session).await,
            CommandAction::Update => handler.update(&command, session).await,
            CommandAction::Delete => handler.delete(&command, session).await,
        };

        match result {
            Ok(broadcasts) => {
                broadcast::deliver_all(&self.connections, broadcasts).await;
                DispatchOutcome::Continue
            }
            Err(err) if err.is_fatal() => {
                tracing::error!(
                    user_id = session.user_id,
                    resource = %command.resource,
                    action = command.action.as_str(),
                    error = %err,
                    "unhandled command handler error, closing connection"
                );
                session.close(CLOSE_SERVER_ERROR, "Internal server error");
                DispatchOutcome::Close
            }
            Err(err) => {
                session.send_fail(&err);
                DispatchOutcome::Continue
            }
        }
    }

    /// Run the on-connect hook. The session is already registered; a failing
    /// hook is logged and cannot undo that.
    pub async fn run_connect_hook(&self, session: &Session) {
        if let Some(hook) = &self.handlers.on_connect {
            self.run_hook("on_connect", hook, session).await;
        } else {
            tracing::debug!(user_id = session.user_id, "new connection");
        }
    }

    /// Run the on-disconnect hook after the read loop has exited and the
    /// session has been unregistered.
    pub async fn run_disconnect_hook(&self, session: &Session) {
        if let Some(hook) = &self.handlers.on_disconnect {
            self.run_hook("on_disconnect", hook, session).await;
        } else {
            tracing::debug!(user_id = session.user_id, "connection closed");
        }
    }

    async fn run_hook(&self, name: &str, hook: &Arc<dyn LifecycleHandler>, session: &Session) {
        match hook.handle(session).await {
            Ok(broadcasts) => {
                tracing::debug!(
                    user_id = session.user_id,
                    hook = name,
                    broadcasts = broadcasts.len(),
                    "lifecycle hook ran"
                );
                broadcast::deliver_all(&self.connections, broadcasts).await;
            }
            Err(err) => {
                tracing::warn!(
                    user_id = session.user_id,
                    hook = name,
                    error = %err,
                    "lifecycle hook failed"
                );
            }
        }
    }
}

fn invalid_resource(resource: &str) -> DomainError {
    DomainError::Validation(format!("invalid resource {:?}", resource))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{decode, ServerEvent};
    use axum::extract::ws::Message;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct EchoQueryHandler;

    #[async_trait]
    impl QueryHandler for EchoQueryHandler {
        async fn handle(&self, query: &Query, session: &Session) -> Result<(), DomainError> {
            session.send_event(&ServerEvent::QueryReply {
                response: json!({"ok": true}),
                query: query.clone(),
            });
            Ok(())
        }
    }

    struct CreateOnlyHandler;

    #[async_trait]
    impl CommandHandler for CreateOnlyHandler {
        async fn create(
            &self,
            command: &Command,
            session: &Session,
        ) -> Result<Vec<Broadcast>, DomainError> {
            Ok(vec![Broadcast {
                receivers: vec![session.user_id],
                event: ServerEvent::CommandDone {
                    command: command.clone(),
                    user_id: session.user_id,
                    result: json!({}),
                },
            }])
        }
    }

    struct PanickyHandler;

    #[async_trait]
    impl CommandHandler for PanickyHandler {
        async fn create(
            &self,
            _command: &Command,
            _session: &Session,
        ) -> Result<Vec<Broadcast>, DomainError> {
            Err(DomainError::Internal("storage exploded".into()))
        }
    }

    fn setup(
        configure: impl FnOnce(&mut HandlerRegistry),
    ) -> (Dispatcher, Arc<ConnectionRegistry>) {
        let mut handlers = HandlerRegistry::new();
        configure(&mut handlers);
        let connections = Arc::new(ConnectionRegistry::new());
        (
            Dispatcher::new(Arc::new(handlers), connections.clone()),
            connections,
        )
    }

    fn session_pair(
        connections: &ConnectionRegistry,
        user_id: i64,
    ) -> (Session, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(user_id, tx);
        connections.register(&session);
        (session, rx)
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<Message>) -> Value {
        match rx.try_recv().unwrap() {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_resource_replies_fail_and_continues() {
        let (dispatcher, connections) = setup(|_| {});
        let (session, mut rx) = session_pair(&connections, 1);

        let event = decode(r#"{"type":"query","resource":"nope"}"#).unwrap();
        let outcome = dispatcher.dispatch(event, &session).await;

        assert_eq!(outcome, DispatchOutcome::Continue);
        let body = next_json(&mut rx);
        assert_eq!(body["status"], "fail");
        assert_eq!(body["error"]["code"], 1);
    }

    #[tokio::test]
    async fn connection_survives_bad_frame_then_serves_query() {
        let (dispatcher, connections) = setup(|h| {
            h.register_query("user", Arc::new(EchoQueryHandler));
        });
        let (session, mut rx) = session_pair(&connections, 1);

        let bad = decode(r#"{"type":"query","resource":"bogus"}"#).unwrap();
        assert_eq!(
            dispatcher.dispatch(bad, &session).await,
            DispatchOutcome::Continue
        );
        let _fail = next_json(&mut rx);

        let good = decode(r#"{"type":"query","resource":"user","uid":"q7"}"#).unwrap();
        dispatcher.dispatch(good, &session).await;
        let reply = next_json(&mut rx);
        assert_eq!(reply["response"]["ok"], true);
        assert_eq!(reply["query"]["uid"], "q7");
    }

    #[tokio::test]
    async fn unimplemented_action_replies_fail_without_broadcast() {
        let (dispatcher, connections) = setup(|h| {
            h.register_command("room", Arc::new(CreateOnlyHandler));
        });
        let (session, mut rx) = session_pair(&connections, 1);

        let event = decode(r#"{"type":"command","resource":"room","action":"delete"}"#).unwrap();
        let outcome = dispatcher.dispatch(event, &session).await;

        assert_eq!(outcome, DispatchOutcome::Continue);
        let body = next_json(&mut rx);
        assert_eq!(body["status"], "fail");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("not implemented"));
        assert!(rx.try_recv().is_err(), "no broadcast may follow");
    }

    #[tokio::test]
    async fn command_broadcast_reaches_issuer_sessions() {
        let (dispatcher, connections) = setup(|h| {
            h.register_command("room", Arc::new(CreateOnlyHandler));
        });
        let (session, mut rx) = session_pair(&connections, 5);

        let event =
            decode(r#"{"type":"command","resource":"room","action":"create","uid":"c1"}"#).unwrap();
        dispatcher.dispatch(event, &session).await;

        let body = next_json(&mut rx);
        assert_eq!(body["user_id"], 5);
        assert_eq!(body["command"]["uid"], "c1");
    }

    #[tokio::test]
    async fn internal_command_error_closes_connection() {
        let (dispatcher, connections) = setup(|h| {
            h.register_command("room", Arc::new(PanickyHandler));
        });
        let (session, mut rx) = session_pair(&connections, 1);

        let event = decode(r#"{"type":"command","resource":"room","action":"create"}"#).unwrap();
        let outcome = dispatcher.dispatch(event, &session).await;

        assert_eq!(outcome, DispatchOutcome::Close);
        match rx.try_recv().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CLOSE_SERVER_ERROR),
            other => panic!("expected close frame, got {:?}", other),
        }
    }
}
