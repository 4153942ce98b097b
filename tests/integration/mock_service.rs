//! Mock implementation for integration tests.
//!
//! A small "probe" interface covering every handler shape, with the
//! implementation recording what it was asked to do so tests can assert
//! on calls, registrations and removals without any real device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ifbind::prelude::*;

// ── Interface ─────────────────────────────────────────────────

pub const GET_TEMP: MessageId = 1;
pub const DESCRIBE: MessageId = 2;
pub const RESET: MessageId = 3;
pub const ADD_WATCH: MessageId = 4;
pub const REMOVE_WATCH: MessageId = 5;
pub const MEASURE: MessageId = 6;
pub const PING: MessageId = 7;

pub const TEMP: i32 = 21;

pub fn probe_schema() -> InterfaceSchema {
    InterfaceSchema::new("probe", 3)
        .operation(OperationSpec::call(GET_TEMP, "GetTemp").returns(ScalarKind::I32))
        .operation(
            OperationSpec::call(DESCRIBE, "Describe")
                .input("index", ScalarKind::U8)
                .input("label", ParamKind::string(16))
                .output("name", ParamKind::string(16))
                .output("count", ScalarKind::U32),
        )
        .operation(OperationSpec::call(RESET, "Reset"))
        .operation(
            OperationSpec::add_handler(ADD_WATCH, "AddWatch", REMOVE_WATCH)
                .input("threshold", ScalarKind::I32)
                .callback(
                    "handler",
                    CallbackSpec::new("Watch")
                        .param("triggered", ScalarKind::Bool)
                        .param("value", ScalarKind::I32),
                ),
        )
        .operation(OperationSpec::remove_handler(
            REMOVE_WATCH,
            "RemoveWatch",
            ADD_WATCH,
        ))
        .operation(
            OperationSpec::call(MEASURE, "Measure")
                .input("samples", ScalarKind::U16)
                .output("average", ScalarKind::F64)
                .output("ok", ScalarKind::Bool),
        )
        .operation(
            OperationSpec::call(PING, "Ping")
                .input("seq", ScalarKind::U32)
                .callback("done", CallbackSpec::new("Pong").param("seq", ScalarKind::U32)),
        )
}

// ── Recording implementation ──────────────────────────────────

#[derive(Default)]
pub struct Probe {
    /// Every handler invocation, by operation id.
    pub calls: Mutex<Vec<MessageId>>,
    pub removals: AtomicUsize,
    pub watches: Mutex<Vec<EventNotifier>>,
    pub commands: Mutex<Vec<CommandHandle>>,
    pub pings: Mutex<Vec<CallbackNotifier>>,
}

#[allow(dead_code)]
impl Probe {
    fn record(&self, ctx: &CallContext) {
        self.calls.lock().unwrap().push(ctx.operation());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn removal_count(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }

    pub fn take_watch(&self) -> EventNotifier {
        self.watches.lock().unwrap().remove(0)
    }

    pub fn take_command(&self) -> CommandHandle {
        self.commands.lock().unwrap().remove(0)
    }

    pub fn take_ping(&self) -> CallbackNotifier {
        self.pings.lock().unwrap().remove(0)
    }
}

pub struct Harness {
    pub server: Server,
    pub handle: ServerHandle,
    pub probe: Arc<Probe>,
}

pub fn start() -> Harness {
    start_with(BindingConfig::default())
}

pub fn start_with(config: BindingConfig) -> Harness {
    let probe = Arc::new(Probe::default());
    let (p1, p2, p3, p4, p5, p6) = (
        probe.clone(),
        probe.clone(),
        probe.clone(),
        probe.clone(),
        probe.clone(),
        probe.clone(),
    );

    let server = ServiceBuilder::new(probe_schema(), config)
        .on_call(GET_TEMP, move |ctx, _args| {
            p1.record(ctx);
            Reply::returning(TEMP)
        })
        .on_call(DESCRIBE, move |ctx, args| {
            p2.record(ctx);
            let index = args[0].as_u32().unwrap_or(0);
            let label = args[1].as_str().unwrap_or_default().to_uppercase();
            Reply::empty().with_output(0, label).with_output(1, index * 10)
        })
        .on_call(RESET, move |ctx, _args| {
            p3.record(ctx);
            Reply::empty()
        })
        .on_add_handler(ADD_WATCH, move |ctx, args, notifier| {
            p4.record(ctx);
            if args[0].as_i32().is_some_and(|t| t < 0) {
                return None;
            }
            p4.watches.lock().unwrap().push(notifier);
            let probe = p4.clone();
            Some(move |_ctx: &CallContext| {
                probe.removals.fetch_add(1, Ordering::SeqCst);
            })
        })
        .on_async_call(MEASURE, move |ctx, _args, command| {
            p5.record(ctx);
            p5.commands.lock().unwrap().push(command);
        })
        .on_callback_call(PING, move |ctx, _args, notifier| {
            p6.record(ctx);
            p6.pings.lock().unwrap().push(notifier);
            Reply::empty()
        })
        .advertise()
        .expect("probe service advertises");

    let handle = server.handle();
    Harness {
        server,
        handle,
        probe,
    }
}

#[allow(dead_code)]
impl Harness {
    pub fn client(&self) -> LocalClient {
        self.handle.connect(&probe_schema()).expect("connect")
    }

    /// Send a call, let the server handle it, and collect the response.
    /// Single-threaded: the test thread is the server thread.
    pub fn roundtrip(
        &mut self,
        client: &mut LocalClient,
        id: MessageId,
        outputs_mask: u32,
        inputs: &[Value],
    ) -> DecodedResponse {
        let txn = client.send_call(id, outputs_mask, inputs).expect("send");
        self.server.poll();
        client.take_response(txn).expect("response")
    }
}
