// HDB - Hardware Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The debugger session and breakpoint evaluation engine.
//!
//! Two threads meet here. The simulator thread calls [`Debugger::eval`] on
//! every evaluation tick and suspends in the latch whenever a breakpoint
//! fires. The server thread dispatches client requests, mutating the active
//! breakpoint set and releasing the latch. The active set and the per-tick
//! cursor are each behind one coarse mutex; contention is two threads, so
//! finer locking buys nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::Result;
use hdb_common::{BreakPoint, DebugExpression, ExpressionError, WaitLatch, ERROR_VALUE_STR};
use hdb_db::SymbolDatabaseClient;
use hdb_rtl::RtlClient;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::protocol::{
    Action, BpLocation, CommandKind, DebuggerInfoKind, Request, Response,
};
use crate::server::DebugServer;
use crate::{
    DEBUG_LOG_PLUS_ARG, DEBUG_PORT_PLUS_ARG, DEBUG_SKIP_DB_LOAD_FLAG, DEFAULT_PORT,
};

/// How the evaluator selects breakpoints each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// Fire every armed breakpoint whose guard is true, in execution order.
    BreakPointOnly,
    /// Fire the single breakpoint following the last-fired one in global
    /// execution order, armed or not, gated only on its table condition.
    StepOver,
}

/// An armed breakpoint owned by the evaluator.
#[derive(Debug, Clone)]
struct DebugBreakPoint {
    id: u32,
    instance_id: u64,
    /// Effective guard: table condition AND user condition.
    expr: DebugExpression,
    /// The table condition alone, used by step-over.
    enable_expr: DebugExpression,
}

#[derive(Debug, Default)]
struct ActiveSet {
    /// Sorted by global execution order after every add.
    list: Vec<DebugBreakPoint>,
    /// Ids currently armed; mirrors `list` exactly.
    inserted: HashSet<u32>,
}

#[derive(Debug, Default)]
struct TickState {
    evaluated: HashSet<u32>,
    current: Option<u32>,
}

type MessageSink = Box<dyn Fn(String) + Send + Sync>;

/// The debug session: evaluator, dispatcher, and server glue.
pub struct Debugger {
    rtl: Arc<RtlClient>,
    latch: WaitLatch,
    db: Mutex<Option<Arc<SymbolDatabaseClient>>>,
    /// Breakpoint id -> execution-order index, filled at DB init.
    ordering: Mutex<HashMap<u32, usize>>,
    active: Mutex<ActiveSet>,
    mode: Mutex<EvaluationMode>,
    /// Set by arms/disarms; consumed at the next tick boundary.
    revert_mode: AtomicBool,
    tick: Mutex<TickState>,
    server: Mutex<Option<DebugServer>>,
    sink: Mutex<Option<MessageSink>>,
    port: u16,
    log_enabled: bool,
}

impl Debugger {
    /// Build a session over an RTL client. The listen port and log level
    /// come from the simulator's plus-args.
    pub fn new(rtl: Arc<RtlClient>) -> Self {
        let argv = rtl.get_argv();
        let port = port_from_argv(&argv);
        let log_enabled = argv.iter().any(|arg| arg == DEBUG_LOG_PLUS_ARG);
        Self {
            rtl,
            latch: WaitLatch::new(),
            db: Mutex::new(None),
            ordering: Mutex::new(HashMap::new()),
            active: Mutex::new(ActiveSet::default()),
            mode: Mutex::new(EvaluationMode::BreakPointOnly),
            revert_mode: AtomicBool::new(false),
            tick: Mutex::new(TickState::default()),
            server: Mutex::new(None),
            sink: Mutex::new(None),
            port,
            log_enabled,
        }
    }

    /// The port the server will listen on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether `+DEBUG_LOG` was given.
    pub fn log_enabled(&self) -> bool {
        self.log_enabled
    }

    /// The RTL client of this session.
    pub fn rtl(&self) -> &Arc<RtlClient> {
        &self.rtl
    }

    /// Install a sink receiving every outbound message. The server wires
    /// itself up through this; tests can observe the stream directly.
    pub fn set_message_sink(&self, sink: MessageSink) {
        *self.sink.lock() = Some(sink);
    }

    /// Start the server and block until the client sends the first
    /// `continue`. The simulation must not advance before that.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        let dispatcher = self.clone();
        let server = DebugServer::start(
            self.port,
            Arc::new(move |message: &str| dispatcher.on_message(message)),
        )?;
        info!(port = server.port(), "debugging server started");
        let broadcaster = server.outbound_sink();
        self.set_message_sink(broadcaster);
        *self.server.lock() = Some(server);
        self.latch.wait();
        Ok(())
    }

    /// Tear the session down: release the simulator, close the server, and
    /// drop all simulator callbacks.
    pub fn stop(&self) {
        self.latch.ready();
        if let Some(server) = self.server.lock().take() {
            server.stop();
        }
        self.rtl.remove_all_callbacks();
    }

    /// Load the symbol table from disk and initialize the session with it.
    pub fn initialize_db(&self, filename: &str) -> bool {
        if !std::path::Path::new(filename).exists() {
            error!(filename, "symbol table does not exist");
            return false;
        }
        info!(filename, "debug symbol table set");
        match SymbolDatabaseClient::open(filename) {
            Ok(client) => {
                self.initialize_db_client(client);
                true
            }
            Err(e) => {
                error!(filename, error = %e, "unable to open symbol table");
                false
            }
        }
    }

    /// Initialize the session from an already-open symbol table client.
    pub fn initialize_db_client(&self, client: SymbolDatabaseClient) {
        info!("computing instance mapping");
        self.rtl.initialize_instance_mapping(&client.get_instance_names());
        info!("computing breakpoint ordering table");
        let mut ordering = self.ordering.lock();
        ordering.clear();
        for (index, &id) in client.execution_bp_orders().iter().enumerate() {
            ordering.insert(id, index);
        }
        drop(ordering);
        *self.db.lock() = Some(Arc::new(client));
    }

    /// The loaded symbol table, if any.
    pub fn db(&self) -> Option<Arc<SymbolDatabaseClient>> {
        self.db.lock().clone()
    }

    /// Evaluate breakpoints for the current simulation tick. Suspends in
    /// the latch on every hit; returns when no eligible breakpoint remains.
    pub fn eval(&self) {
        debug!("start breakpoint evaluation");
        self.start_breakpoint_evaluation();
        while let Some(bp) = self.next_breakpoint() {
            let Some(db) = self.db() else { break };
            let step_over = *self.mode.lock() == EvaluationMode::StepOver;
            let expr = if step_over { &bp.enable_expr } else { &bp.expr };
            let Some(instance_name) = db.get_instance_name(bp.instance_id) else { continue };

            // context values that are static take priority over RTL state
            let static_values = db.get_context_static_values(bp.id);
            let mut values = HashMap::new();
            for symbol in expr.symbols() {
                if let Some(&value) = static_values.get(symbol) {
                    values.insert(symbol.clone(), value);
                } else {
                    let scoped = format!("{instance_name}.{symbol}");
                    let full_name = self.rtl.get_full_name(&scoped);
                    match self.rtl.get_value(&full_name) {
                        Some(value) => {
                            values.insert(symbol.clone(), value);
                        }
                        None => break,
                    }
                }
            }
            if values.len() != expr.symbols().len() {
                error!(breakpoint = bp.id, "unable to evaluate breakpoint");
                continue;
            }
            if expr.eval(&values).is_some_and(|value| value != 0) {
                self.send_breakpoint_hit(&bp);
                self.latch.wait();
            }
        }
    }

    /// Dispatch one request line from the client.
    pub fn on_message(&self, message: &str) {
        let request: Request = match serde_json::from_str(message) {
            Ok(request) => request,
            Err(e) => {
                self.send_message(Response::error(e.to_string()).to_json());
                return;
            }
        };
        match request {
            Request::Connection { db_filename, path_mapping } => {
                self.handle_connection(&db_filename, path_mapping)
            }
            Request::Breakpoint { action, filename, line_num, column_num, condition } => {
                self.handle_breakpoint(action, &filename, line_num, column_num, &condition)
            }
            Request::BreakpointId { action, id, condition } => {
                self.handle_breakpoint_id(action, id, &condition)
            }
            Request::BpLocation { filename, line_num, column_num } => {
                self.handle_bp_location(&filename, line_num, column_num)
            }
            Request::Command { command } => self.handle_command(command),
            Request::DebuggerInfo { command } => self.handle_debugger_info(command),
            Request::Error {} => {}
        }
    }

    fn handle_connection(&self, db_filename: &str, mapping: BTreeMap<String, String>) {
        let skip = self.has_cli_flag(DEBUG_SKIP_DB_LOAD_FLAG);
        let success = skip || self.initialize_db(db_filename);
        if success {
            if !mapping.is_empty() {
                if let Some(db) = self.db() {
                    db.set_src_mapping(mapping);
                }
            }
            self.send_message(Response::success().to_json());
        } else {
            self.send_message(
                Response::error(format!("Unable to find {db_filename}")).to_json(),
            );
        }
        debug!("handle_connection finished");
    }

    fn handle_breakpoint(
        &self,
        action: Action,
        filename: &str,
        line_num: u32,
        column_num: u32,
        condition: &str,
    ) {
        let Some(db) = self.check_send_db_error() else { return };
        let bps = db.get_breakpoints(filename, line_num, column_num);
        match action {
            Action::Add => {
                if bps.is_empty() {
                    self.send_message(
                        Response::error(format!(
                            "{filename}:{line_num} is not a valid breakpoint"
                        ))
                        .to_json(),
                    );
                    return;
                }
                for bp in &bps {
                    if let Err(e) = self.add_breakpoint(condition, bp) {
                        self.send_message(
                            Response::error(format!("invalid condition: {e}")).to_json(),
                        );
                        return;
                    }
                }
                self.reorder_breakpoints();
            }
            Action::Remove => {
                // removal needs no reordering
                for bp in &bps {
                    self.remove_breakpoint(bp.id);
                }
            }
        }
        self.send_message(Response::success().to_json());
    }

    fn handle_breakpoint_id(&self, action: Action, id: u32, condition: &str) {
        let Some(db) = self.check_send_db_error() else { return };
        match action {
            Action::Add => {
                let Some(bp) = db.get_breakpoint(id) else {
                    self.send_message(
                        Response::error(format!("BP ({id}) is not a valid breakpoint"))
                            .to_json(),
                    );
                    return;
                };
                if let Err(e) = self.add_breakpoint(condition, &bp) {
                    self.send_message(
                        Response::error(format!("invalid condition: {e}")).to_json(),
                    );
                    return;
                }
                self.reorder_breakpoints();
            }
            Action::Remove => self.remove_breakpoint(id),
        }
        self.send_message(Response::success().to_json());
    }

    fn handle_bp_location(&self, filename: &str, line_num: Option<u32>, column_num: Option<u32>) {
        let Some(db) = self.check_send_db_error() else { return };
        let bps = match line_num {
            None => db.get_file_breakpoints(filename),
            Some(line) => db.get_breakpoints(filename, line, column_num.unwrap_or(0)),
        };
        let breakpoints = bps
            .into_iter()
            .map(|bp| BpLocation {
                id: bp.id,
                filename: bp.filename,
                line_num: bp.line_num,
                column_num: bp.column_num,
            })
            .collect();
        self.send_message(Response::BpLocationResponse { breakpoints }.to_json());
    }

    fn handle_command(&self, command: CommandKind) {
        match command {
            CommandKind::Continue => {
                debug!("handle_command: continue");
                self.latch.ready();
            }
            CommandKind::StepOver => {
                debug!("handle_command: step_over");
                *self.mode.lock() = EvaluationMode::StepOver;
                self.latch.ready();
            }
            CommandKind::Stop => {
                debug!("handle_command: stop");
                self.latch.ready();
                self.rtl.finish_sim();
                self.stop();
            }
        }
    }

    fn handle_debugger_info(&self, command: DebuggerInfoKind) {
        match command {
            DebuggerInfoKind::Breakpoints => {
                let Some(db) = self.check_send_db_error() else { return };
                let active = self.active.lock();
                let breakpoints = active
                    .list
                    .iter()
                    .filter_map(|bp| db.get_breakpoint(bp.id))
                    .map(|bp| BpLocation {
                        id: bp.id,
                        filename: bp.filename,
                        line_num: bp.line_num,
                        column_num: bp.column_num,
                    })
                    .collect();
                drop(active);
                self.send_message(Response::DebuggerInfoResponse { breakpoints }.to_json());
            }
        }
    }

    /// Arm a breakpoint, composing the table condition with the user
    /// condition. A second add for an already-armed id replaces its guard.
    fn add_breakpoint(
        &self,
        user_condition: &str,
        db_bp: &BreakPoint,
    ) -> Result<(), ExpressionError> {
        let mut cond =
            if db_bp.condition.is_empty() { "1".to_string() } else { db_bp.condition.clone() };
        if !user_condition.is_empty() {
            cond = format!("{cond} and {user_condition}");
        }
        let expr = DebugExpression::new(cond)?;
        info!(filename = %db_bp.filename, line = db_bp.line_num, "breakpoint inserted");

        // any arm/disarm leaves step-over mode at the next tick
        self.revert_mode.store(true, Ordering::SeqCst);

        let mut active = self.active.lock();
        if !active.inserted.contains(&db_bp.id) {
            let enable_expr = DebugExpression::new(db_bp.condition.clone())?;
            active.inserted.insert(db_bp.id);
            active.list.push(DebugBreakPoint {
                id: db_bp.id,
                instance_id: db_bp.instance_id.unwrap_or_default(),
                expr,
                enable_expr,
            });
        } else if let Some(existing) = active.list.iter_mut().find(|bp| bp.id == db_bp.id) {
            existing.expr = expr;
        }
        Ok(())
    }

    fn remove_breakpoint(&self, id: u32) {
        self.revert_mode.store(true, Ordering::SeqCst);
        let mut active = self.active.lock();
        if active.inserted.remove(&id) {
            active.list.retain(|bp| bp.id != id);
        }
    }

    /// Re-sort the active list by the global execution ordering.
    fn reorder_breakpoints(&self) {
        let ordering = self.ordering.lock();
        let mut active = self.active.lock();
        active.list.sort_by_key(|bp| ordering.get(&bp.id).copied().unwrap_or(usize::MAX));
    }

    fn start_breakpoint_evaluation(&self) {
        if self.revert_mode.swap(false, Ordering::SeqCst) {
            *self.mode.lock() = EvaluationMode::BreakPointOnly;
        }
        let mut tick = self.tick.lock();
        tick.evaluated.clear();
        tick.current = None;
    }

    /// Select the next breakpoint to evaluate this tick, or `None` when the
    /// tick is exhausted.
    fn next_breakpoint(&self) -> Option<DebugBreakPoint> {
        match *self.mode.lock() {
            EvaluationMode::BreakPointOnly => {
                let active = self.active.lock();
                let mut tick = self.tick.lock();
                // resume after the last already-evaluated entry: entries the
                // server sorted in above the cursor wait until the next tick
                let mut position = None;
                for (index, bp) in active.list.iter().enumerate() {
                    if tick.evaluated.contains(&bp.id) {
                        position = Some(index);
                    }
                }
                let index = match position {
                    Some(position) if position + 1 < active.list.len() => position + 1,
                    Some(_) => return None,
                    None if !active.list.is_empty() => 0,
                    None => return None,
                };
                let bp = active.list[index].clone();
                tick.current = Some(bp.id);
                tick.evaluated.insert(bp.id);
                Some(bp)
            }
            EvaluationMode::StepOver => {
                let db = self.db()?;
                let orders = db.execution_bp_orders().to_vec();
                let mut tick = self.tick.lock();
                let next_id = match tick.current {
                    None => orders.first().copied(),
                    Some(current) => orders
                        .iter()
                        .position(|&id| id == current)
                        .and_then(|index| orders.get(index + 1))
                        .copied(),
                }?;
                tick.current = Some(next_id);
                tick.evaluated.insert(next_id);
                drop(tick);

                let record = db.get_breakpoint(next_id)?;
                let enable_expr = DebugExpression::new(record.condition.clone()).ok()?;
                Some(DebugBreakPoint {
                    id: next_id,
                    instance_id: record.instance_id.unwrap_or_default(),
                    expr: enable_expr.clone(),
                    enable_expr,
                })
            }
        }
    }

    /// Push the hit event, with generator and context variable snapshots
    /// taken at the current simulation time.
    fn send_breakpoint_hit(&self, bp: &DebugBreakPoint) {
        let Some(db) = self.db() else { return };
        let Some(record) = db.get_breakpoint(bp.id) else { return };
        let instance_name = db.get_instance_name(bp.instance_id).unwrap_or_default();

        let mut generators = BTreeMap::new();
        for (gen_var, var) in db.get_generator_variables(bp.instance_id, true) {
            generators.insert(gen_var.name, self.render_variable_value(&var.value, var.is_rtl));
        }
        let mut locals = BTreeMap::new();
        for (ctx_var, var) in db.get_context_variables(bp.id, true) {
            locals.insert(ctx_var.name, self.render_variable_value(&var.value, var.is_rtl));
        }

        let response = Response::BreakpointHit {
            time: self.rtl.get_simulation_time(),
            instance_id: bp.instance_id,
            instance_name,
            id: bp.id,
            filename: record.filename,
            line_num: record.line_num,
            column_num: record.column_num,
            locals,
            generators,
        };
        self.send_message(response.to_json());
    }

    /// Live values go through the RTL interface; unreadable ones render as
    /// the error sentinel. Literals pass through.
    fn render_variable_value(&self, value: &str, is_rtl: bool) -> String {
        if !is_rtl {
            return value.to_string();
        }
        let full_name = self.rtl.get_full_name(value);
        match self.rtl.get_value(&full_name) {
            Some(v) => v.to_string(),
            None => ERROR_VALUE_STR.to_string(),
        }
    }

    fn check_send_db_error(&self) -> Option<Arc<SymbolDatabaseClient>> {
        let db = self.db();
        if db.is_none() {
            self.send_message(
                Response::error("Database is not initialized or is initialized incorrectly")
                    .to_json(),
            );
        }
        db
    }

    fn has_cli_flag(&self, flag: &str) -> bool {
        self.rtl.get_argv().iter().any(|arg| arg == flag)
    }

    fn send_message(&self, message: String) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink(message);
        }
    }
}

/// `+DEBUG_PORT=<n>`, falling back to the default on absence or parse
/// failure.
fn port_from_argv(argv: &[String]) -> u16 {
    for arg in argv {
        if let Some(port) = arg.strip_prefix(DEBUG_PORT_PLUS_ARG) {
            return port.parse().unwrap_or(DEFAULT_PORT);
        }
    }
    DEFAULT_PORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdb_common::Instance;
    use hdb_db::{ScopeEntry, SymbolStore};
    use hdb_rtl::{
        CallbackHandle, ModuleInfo, SignalIterKind, SimHandle, SimProvider, ValueCallback,
    };
    use std::sync::mpsc;

    fn name_hash(name: &str) -> u64 {
        name.bytes().fold(1u64, |acc, b| acc.wrapping_mul(131).wrapping_add(b.into()))
    }

    /// Flat single-module design with settable values.
    struct TestProvider {
        values: Mutex<HashMap<String, i64>>,
        argv: Vec<String>,
    }

    impl TestProvider {
        fn new() -> Self {
            Self { values: Mutex::new(HashMap::new()), argv: vec![] }
        }

        fn set_value(&self, name: &str, value: Option<i64>) {
            let mut values = self.values.lock();
            match value {
                Some(value) => values.insert(name.to_string(), value),
                None => values.remove(name),
            };
        }
    }

    impl SimProvider for TestProvider {
        fn product(&self) -> String {
            "test".to_string()
        }

        fn argv(&self) -> Vec<String> {
            self.argv.clone()
        }

        fn simulation_time(&self) -> u64 {
            100
        }

        fn handle_by_name(&self, full_name: &str) -> Option<SimHandle> {
            // handles must stay stable across lookups; derive from the name
            self.values
                .lock()
                .contains_key(full_name)
                .then(|| SimHandle(name_hash(full_name)))
        }

        fn get_value(&self, handle: SimHandle) -> Option<i64> {
            let values = self.values.lock();
            values
                .iter()
                .find(|(name, _)| name_hash(name) == handle.0)
                .map(|(_, &value)| value)
        }

        fn child_modules(&self, _parent: Option<SimHandle>) -> Vec<ModuleInfo> {
            vec![]
        }

        fn module_signals(
            &self,
            _module: SimHandle,
            _kind: SignalIterKind,
        ) -> Vec<(String, SimHandle)> {
            vec![]
        }

        fn register_value_callback(
            &self,
            _handle: SimHandle,
            _callback: ValueCallback,
        ) -> Option<CallbackHandle> {
            Some(CallbackHandle(1))
        }

        fn remove_callback(&self, _callback: CallbackHandle) {}

        fn stop(&self) {}

        fn finish(&self) {}
    }

    fn store_with_scopes() -> SymbolStore {
        SymbolStore {
            breakpoints: vec![
                BreakPoint {
                    id: 0,
                    instance_id: Some(0),
                    filename: "mod.py".to_string(),
                    line_num: 1,
                    column_num: 0,
                    condition: String::new(),
                },
                BreakPoint {
                    id: 1,
                    instance_id: Some(0),
                    filename: "mod.py".to_string(),
                    line_num: 2,
                    column_num: 0,
                    condition: String::new(),
                },
                BreakPoint {
                    id: 2,
                    instance_id: Some(0),
                    filename: "mod.py".to_string(),
                    line_num: 3,
                    column_num: 0,
                    condition: String::new(),
                },
            ],
            instances: vec![Instance { id: 0, name: "top".to_string() }],
            scopes: Some(vec![ScopeEntry { scope: 0, breakpoints: vec![0, 1, 2] }]),
            ..Default::default()
        }
    }

    struct Session {
        provider: Arc<TestProvider>,
        debugger: Arc<Debugger>,
        messages: mpsc::Receiver<String>,
    }

    fn session(store: SymbolStore) -> Session {
        let provider = Arc::new(TestProvider::new());
        let rtl = Arc::new(RtlClient::new(provider.clone()));
        let debugger = Arc::new(Debugger::new(rtl));
        debugger.initialize_db_client(SymbolDatabaseClient::from_store(store));
        let (tx, rx) = mpsc::channel();
        debugger.set_message_sink(Box::new(move |message| {
            let _ = tx.send(message);
        }));
        Session { provider, debugger, messages: rx }
    }

    fn hit_id(message: &str) -> Option<u32> {
        let response: Response = serde_json::from_str(message).ok()?;
        match response {
            Response::BreakpointHit { id, .. } => Some(id),
            _ => None,
        }
    }

    #[test]
    fn test_step_over_walks_execution_order() {
        let s = session(store_with_scopes());
        *s.debugger.mode.lock() = EvaluationMode::StepOver;

        let debugger = s.debugger.clone();
        let worker = std::thread::spawn(move || debugger.eval());

        // each hit blocks the simulator until we continue
        for expected in [0u32, 1, 2] {
            let hit = loop {
                let message = s.messages.recv().unwrap();
                if let Some(id) = hit_id(&message) {
                    break id;
                }
            };
            assert_eq!(hit, expected);
            s.debugger.handle_command(CommandKind::Continue);
        }

        // the order is exhausted: eval returns without another hit
        worker.join().unwrap();
        assert!(s.messages.try_iter().filter_map(|m| hit_id(&m)).next().is_none());
    }

    #[test]
    fn test_dedup_add_updates_guard() {
        let s = session(store_with_scopes());
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "x > 0");
        let active = s.debugger.active.lock();
        assert_eq!(active.list.len(), 1);
        assert_eq!(active.list[0].expr.source(), "1 and x > 0");
        let enable_before = active.list[0].enable_expr.source().to_string();
        drop(active);

        // re-add with a different user condition: guard replaced, not stacked
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "y < 3");
        let active = s.debugger.active.lock();
        assert_eq!(active.list.len(), 1);
        assert_eq!(active.inserted.len(), 1);
        assert_eq!(active.list[0].expr.source(), "1 and y < 3");
        assert_eq!(active.list[0].enable_expr.source(), enable_before);
    }

    #[test]
    fn test_active_list_sorted_by_execution_order() {
        let mut store = store_with_scopes();
        // reversed execution order: 2, 1, 0
        store.scopes = Some(vec![ScopeEntry { scope: 0, breakpoints: vec![2, 1, 0] }]);
        let s = session(store);
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "");
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 3, 0, "");
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 2, 0, "");

        let active = s.debugger.active.lock();
        let ids: Vec<u32> = active.list.iter().map(|bp| bp.id).collect();
        assert_eq!(ids, [2, 1, 0]);
    }

    #[test]
    fn test_remove_breakpoint() {
        let s = session(store_with_scopes());
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "");
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 2, 0, "");
        s.debugger.handle_breakpoint(Action::Remove, "mod.py", 1, 0, "");

        let active = s.debugger.active.lock();
        assert_eq!(active.list.len(), 1);
        assert_eq!(active.list[0].id, 1);
        assert!(!active.inserted.contains(&0));
    }

    #[test]
    fn test_unreadable_value_skips_breakpoint() {
        let mut store = store_with_scopes();
        store.breakpoints[0].condition = "s > 0".to_string();
        let s = session(store);
        // bp 0 references RTL signal `s`, which the provider cannot read;
        // bp 1 is unconditional and must still fire
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "");
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 2, 0, "");

        let debugger = s.debugger.clone();
        let worker = std::thread::spawn(move || debugger.eval());

        let hit = loop {
            let message = s.messages.recv().unwrap();
            if let Some(id) = hit_id(&message) {
                break id;
            }
        };
        assert_eq!(hit, 1);
        s.debugger.handle_command(CommandKind::Continue);
        worker.join().unwrap();
    }

    #[test]
    fn test_guard_evaluates_rtl_value() {
        let mut store = store_with_scopes();
        store.breakpoints[0].condition = "s > 4".to_string();
        let s = session(store);
        s.provider.set_value("top.s", Some(3));
        s.debugger.handle_breakpoint(Action::Add, "mod.py", 1, 0, "");

        // guard false: eval completes without a hit
        s.debugger.eval();
        assert!(s.messages.try_iter().filter_map(|m| hit_id(&m)).next().is_none());

        // guard true now
        s.provider.set_value("top.s", Some(5));
        let debugger = s.debugger.clone();
        let worker = std::thread::spawn(move || debugger.eval());
        let hit = loop {
            let message = s.messages.recv().unwrap();
            if let Some(id) = hit_id(&message) {
                break id;
            }
        };
        assert_eq!(hit, 0);
        s.debugger.handle_command(CommandKind::Continue);
        worker.join().unwrap();
    }

    #[test]
    fn test_db_gate() {
        let provider = Arc::new(TestProvider::new());
        let rtl = Arc::new(RtlClient::new(provider));
        let debugger = Arc::new(Debugger::new(rtl));
        let (tx, rx) = mpsc::channel();
        debugger.set_message_sink(Box::new(move |message| {
            let _ = tx.send(message);
        }));

        debugger.on_message(r#"{"type": "bp_location", "filename": "mod.py"}"#);
        let reply = rx.recv().unwrap();
        assert!(reply.contains("Database is not initialized"));
    }

    #[test]
    fn test_malformed_request_reports_reason() {
        let s = session(store_with_scopes());
        s.debugger.on_message("{not json");
        let reply = s.messages.recv().unwrap();
        assert!(reply.contains(r#""status":"error""#));
    }

    #[test]
    fn test_invalid_location_reports_error() {
        let s = session(store_with_scopes());
        s.debugger.handle_breakpoint(Action::Add, "other.py", 9, 0, "");
        let reply = s.messages.recv().unwrap();
        assert!(reply.contains("is not a valid breakpoint"));
    }

    #[test]
    fn test_port_from_argv() {
        let argv =
            vec!["simv".to_string(), "+DEBUG_PORT=9123".to_string(), "+DEBUG_LOG".to_string()];
        assert_eq!(port_from_argv(&argv), 9123);
        assert_eq!(port_from_argv(&["simv".to_string()]), DEFAULT_PORT);
        assert_eq!(port_from_argv(&["+DEBUG_PORT=nope".to_string()]), DEFAULT_PORT);
    }
}
