use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ipclink_frame::{DataMessage, Formatter, Text, NO_REF};
use ipclink_transport::{connect, Connection, ConnectionId, Target};
use tracing::{debug, error, info, warn};

use crate::config::ModuleConfig;
use crate::error::{PeerError, Result};
use crate::message::{DirectHandler, MessageClass, MessageDef};
use crate::reference::{RefHandle, RefTable, Reference, ResponseState};

/// Called when the router connection is found closed.
pub type RouterLostHook = Arc<dyn Fn() + Send + Sync>;

/// Lock a mutex, recovering the data if another thread panicked while
/// holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct ModuleState {
    pub(crate) messages: HashMap<String, Arc<MessageDef>>,
    pub(crate) class_formats: HashMap<MessageClass, Arc<dyn Formatter>>,
    pub(crate) parent_ref: i32,
    pub(crate) router_lost: Option<RouterLostHook>,
}

pub(crate) struct CommState {
    pub(crate) router: Option<Arc<Connection>>,
    pub(crate) connections: HashMap<ConnectionId, Arc<Connection>>,
    pub(crate) next_send_ref: i32,
    /// Query replies read while waiting for a different one.
    pub(crate) pending_replies: VecDeque<DataMessage>,
    /// Everything else read while waiting for a reply.
    pub(crate) inbound: VecDeque<(ConnectionId, DataMessage)>,
}

/// All state of one participating module.
///
/// Locks are always taken in the order module, comm, refs, and none is held
/// across a blocking read or write.
pub struct ModuleContext {
    pub(crate) config: ModuleConfig,
    pub(crate) module: Mutex<ModuleState>,
    pub(crate) comm: Mutex<CommState>,
    pub(crate) refs: Mutex<RefTable>,
}

impl ModuleContext {
    pub fn new(config: ModuleConfig) -> Self {
        let mut class_formats: HashMap<MessageClass, Arc<dyn Formatter>> = HashMap::new();
        class_formats.insert(MessageClass::ExecHnd, Arc::new(Text));

        Self {
            config,
            module: Mutex::new(ModuleState {
                messages: HashMap::new(),
                class_formats,
                parent_ref: NO_REF,
                router_lost: None,
            }),
            comm: Mutex::new(CommState {
                router: None,
                connections: HashMap::new(),
                next_send_ref: 0,
                pending_replies: VecDeque::new(),
                inbound: VecDeque::new(),
            }),
            refs: Mutex::new(RefTable::new()),
        }
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Register (or replace) a message definition.
    pub fn register_message(&self, def: MessageDef) -> Arc<MessageDef> {
        let def = Arc::new(def);
        lock(&self.module)
            .messages
            .insert(def.name.clone(), def.clone());
        def
    }

    pub fn message(&self, name: &str) -> Option<Arc<MessageDef>> {
        lock(&self.module).messages.get(name).cloned()
    }

    pub(crate) fn require_message(&self, name: &str) -> Result<Arc<MessageDef>> {
        self.message(name)
            .ok_or_else(|| PeerError::UndefinedMessage(name.to_string()))
    }

    /// Append a point-to-point recipient for `name`.
    pub fn add_direct_handler(&self, name: &str, conn: Arc<Connection>, intent: i32) -> Result<()> {
        let mut module = lock(&self.module);
        let def = module
            .messages
            .get_mut(name)
            .ok_or_else(|| PeerError::UndefinedMessage(name.to_string()))?;
        Arc::make_mut(def).add_handler(DirectHandler::new(conn, intent));
        Ok(())
    }

    /// Formatter used for the class segment of messages of `class`.
    pub fn set_class_format(&self, class: MessageClass, formatter: Arc<dyn Formatter>) {
        lock(&self.module).class_formats.insert(class, formatter);
    }

    pub(crate) fn class_format(&self, class: MessageClass) -> Option<Arc<dyn Formatter>> {
        lock(&self.module).class_formats.get(&class).cloned()
    }

    pub fn set_parent_ref(&self, parent_ref: i32) {
        lock(&self.module).parent_ref = parent_ref;
    }

    pub fn parent_ref(&self) -> i32 {
        lock(&self.module).parent_ref
    }

    /// Run `hook` when the router connection closes.
    pub fn on_router_lost(&self, hook: impl Fn() + Send + Sync + 'static) {
        lock(&self.module).router_lost = Some(Arc::new(hook));
    }

    /// Connect to the configured router.
    pub fn connect_router(&self) -> Result<Arc<Connection>> {
        let conn = connect(&self.config.router, &self.config.connect)?;
        info!(
            module = %self.config.module_name,
            router = %self.config.router,
            kind = conn.kind().as_str(),
            "connected to router"
        );
        Ok(self.attach_router(conn))
    }

    /// Use an already established connection as the router connection.
    pub fn attach_router(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut comm = lock(&self.comm);
        comm.connections.insert(conn.id(), conn.clone());
        if let Some(old) = comm.router.replace(conn.clone()) {
            comm.connections.remove(&old.id());
            old.invalidate();
        }
        conn
    }

    /// Open a direct connection to another module.
    pub fn connect_module(&self, target: &Target) -> Result<Arc<Connection>> {
        let conn = connect(target, &self.config.connect)?;
        Ok(self.add_connection(conn))
    }

    /// Track a direct connection so it is cleaned up when it closes.
    pub fn add_connection(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        lock(&self.comm).connections.insert(conn.id(), conn.clone());
        conn
    }

    pub fn router(&self) -> Option<Arc<Connection>> {
        lock(&self.comm).router.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.comm)
            .router
            .as_ref()
            .is_some_and(|conn| conn.is_open())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        lock(&self.comm).connections.get(&id).cloned()
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.comm).connections.len()
    }

    /// Next message correlation id; never negative.
    pub fn next_send_ref(&self) -> i32 {
        let mut comm = lock(&self.comm);
        comm.next_send_ref = match comm.next_send_ref.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
        comm.next_send_ref
    }

    /// Tear down a connection the peer has closed.
    ///
    /// Both descriptors are shut down and the connection leaves the table.
    /// For a direct peer every handler that used it is detached. Losing the
    /// router runs the hook from [`on_router_lost`](Self::on_router_lost).
    /// Returns false if the connection was not in the table.
    pub fn handle_closed_connection(&self, id: ConnectionId) -> bool {
        let mut module = lock(&self.module);
        let mut comm = lock(&self.comm);

        let Some(conn) = comm.connections.remove(&id) else {
            return false;
        };
        conn.invalidate();

        let is_router = comm.router.as_ref().is_some_and(|router| router.id() == id);
        if is_router {
            comm.router = None;
            error!(connection = %id, peer = conn.peer(), "closed connection detected from router");
            let hook = module.router_lost.clone();
            drop(comm);
            drop(module);
            if let Some(hook) = hook {
                hook();
            }
        } else {
            warn!(connection = %id, peer = conn.peer(), "closed connection detected from module");
            for def in module.messages.values_mut() {
                if def.handlers().is_empty() {
                    continue;
                }
                let mut updated = (**def).clone();
                if updated.reset_direct(id) {
                    debug!(message = %updated.name, connection = %id, "direct handlers reset");
                    *def = Arc::new(updated);
                }
            }
        }
        true
    }

    /// Close every connection and drop queued traffic.
    pub fn shutdown(&self) {
        let mut comm = lock(&self.comm);
        for conn in comm.connections.values() {
            conn.invalidate();
        }
        comm.connections.clear();
        comm.router = None;
        comm.pending_replies.clear();
        comm.inbound.clear();
        debug!(module = %self.config.module_name, "module shut down");
    }

    /// Create a reference for an exchange with correlation id `id`.
    pub fn create_reference(
        &self,
        msg: Option<Arc<MessageDef>>,
        name: Option<&str>,
        id: i32,
    ) -> RefHandle {
        lock(&self.refs).acquire(msg, name, id)
    }

    /// Create the reference a handler answers an incoming query through.
    pub fn adopt_query(&self, query: &DataMessage, from: ConnectionId, msg_name: &str) -> RefHandle {
        let msg = self.message(msg_name);
        let detached = self.config.detached_responses;
        let mut refs = lock(&self.refs);
        let handle = refs.acquire(msg, Some(msg_name), query.msg_ref());
        if let Ok(entry) = refs.get_mut(handle) {
            entry.reply_to = Some(from);
            if detached {
                entry.response = ResponseState::Detached;
            }
        }
        handle
    }

    /// Mark a reference as answered outside its handler.
    pub fn detach_response(&self, handle: RefHandle) -> Result<()> {
        lock(&self.refs).get_mut(handle)?.response = ResponseState::Detached;
        Ok(())
    }

    /// Snapshot of a live reference.
    pub fn reference(&self, handle: RefHandle) -> Result<Reference> {
        lock(&self.refs).get(handle).cloned()
    }

    pub fn reference_id(&self, handle: RefHandle) -> Result<i32> {
        Ok(lock(&self.refs).get(handle)?.id)
    }

    pub fn reference_name(&self, handle: RefHandle) -> Result<Option<String>> {
        Ok(lock(&self.refs).get(handle)?.name.clone())
    }

    /// Release a reference locally, without telling the router.
    pub fn free_reference(&self, handle: RefHandle) -> Result<()> {
        lock(&self.refs).release(handle).map(|_| ())
    }

    pub fn live_references(&self) -> usize {
        lock(&self.refs).live()
    }

    /// The message definition a reference is for, binding it by name on
    /// first use.
    pub(crate) fn resolve_reference_msg(&self, handle: RefHandle) -> Result<Arc<MessageDef>> {
        let entry = self.reference(handle)?;
        if let Some(msg) = entry.msg {
            return Ok(msg);
        }
        let name = entry.name.ok_or(PeerError::BadReference(entry.id))?;
        let msg = self.require_message(&name)?;
        lock(&self.refs).get_mut(handle)?.msg = Some(msg.clone());
        Ok(msg)
    }

    /// Oldest envelope that arrived while waiting for a reply.
    pub fn take_inbound(&self) -> Option<(ConnectionId, DataMessage)> {
        lock(&self.comm).inbound.pop_front()
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.config.module_name)
            .field("router", &self.config.router)
            .finish_non_exhaustive()
    }
}
