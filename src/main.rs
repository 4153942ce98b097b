//! ifbind demo host: a thermal sensor service.
//!
//! ```text
//! ┌──────────────┐  GetTemp / AddAlarmHandler / Calibrate   ┌──────────────────┐
//! │ client thread│ ───────────────────────────────────────▶ │ main thread      │
//! │ (local +     │ ◀─────────────────────────────────────── │ Server::run()    │
//! │  remote)     │        responses, AlarmHandler events     └──────────────────┘
//! └──────────────┘                                ▲                 ▲
//!                                                 │ notify()        │ respond()
//!                                      ┌──────────┴───┐     ┌───────┴───────┐
//!                                      │ sensor thread│     │ calibrate job │
//!                                      └──────────────┘     └───────────────┘
//! ```
//!
//! Usage: `ifbind-demo [config.json]`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use core::cell::RefCell;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use log::{info, warn};

use ifbind::adapters::console_log;
use ifbind::prelude::*;

// ── Interface ─────────────────────────────────────────────────

const GET_TEMP: MessageId = 1;
const ADD_ALARM_HANDLER: MessageId = 2;
const REMOVE_ALARM_HANDLER: MessageId = 3;
const CALIBRATE: MessageId = 4;

fn thermal_schema() -> InterfaceSchema {
    InterfaceSchema::new("thermal", 1)
        .operation(OperationSpec::call(GET_TEMP, "GetTemp").returns(ScalarKind::I32))
        .operation(
            OperationSpec::add_handler(ADD_ALARM_HANDLER, "AddAlarmHandler", REMOVE_ALARM_HANDLER)
                .input("threshold", ScalarKind::I32)
                .callback(
                    "handler",
                    CallbackSpec::new("AlarmHandler")
                        .param("triggered", ScalarKind::Bool)
                        .param("value", ScalarKind::I32),
                ),
        )
        .operation(OperationSpec::remove_handler(
            REMOVE_ALARM_HANDLER,
            "RemoveAlarmHandler",
            ADD_ALARM_HANDLER,
        ))
        .operation(
            OperationSpec::call(CALIBRATE, "Calibrate")
                .input("offset", ScalarKind::I32)
                .output("applied", ScalarKind::I32)
                .output("note", ParamKind::string(32)),
        )
}

// ── Implementation state ──────────────────────────────────────

struct Alarm {
    handle: u32,
    threshold: i32,
    armed: bool,
    notifier: EventNotifier,
}

type Alarms = Arc<Mutex<CriticalSectionRawMutex, RefCell<Vec<Alarm>>>>;

fn sensor_loop(temp: &AtomicI32, alarms: &Alarms, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(20));
        if alarms.lock(|a| a.borrow().is_empty()) {
            continue;
        }
        let t = temp.fetch_add(1, Ordering::AcqRel) + 1;
        let due: Vec<EventNotifier> = alarms.lock(|a| {
            a.borrow_mut()
                .iter_mut()
                .filter(|al| al.armed && t >= al.threshold)
                .map(|al| {
                    al.armed = false;
                    al.notifier.clone()
                })
                .collect()
        });
        for n in due {
            info!("sensor: {}°C crosses alarm {:#x}", t, n.handle());
            n.notify(&[Value::Bool(true), Value::I32(t)]);
        }
    }
}

fn build_server(config: BindingConfig, temp: &Arc<AtomicI32>, alarms: &Alarms) -> Result<Server> {
    let get_temp = temp.clone();
    let add_alarms = alarms.clone();
    let cal_temp = temp.clone();
    let responder_slot: Arc<std::sync::OnceLock<Responder>> = Arc::new(std::sync::OnceLock::new());
    let cal_responder = responder_slot.clone();

    let server = ServiceBuilder::new(thermal_schema(), config)
        .on_call(GET_TEMP, move |_ctx, _args| {
            Reply::returning(get_temp.load(Ordering::Acquire))
        })
        .on_add_handler(ADD_ALARM_HANDLER, move |ctx, args, notifier| {
            let threshold = args[0].as_i32().unwrap_or(i32::MAX);
            let handle = notifier.handle();
            info!("impl: {} adds alarm {:#x} at {}°C", ctx.session(), handle, threshold);
            add_alarms.lock(|a| {
                a.borrow_mut().push(Alarm {
                    handle,
                    threshold,
                    armed: true,
                    notifier,
                });
            });
            let alarms = add_alarms.clone();
            Some(move |ctx: &CallContext| {
                alarms.lock(|a| a.borrow_mut().retain(|al| al.handle != handle));
                info!("impl: alarm {:#x} removed ({})", handle, ctx.session());
            })
        })
        .on_async_call(CALIBRATE, move |ctx, args, command| {
            let offset = args[0].as_i32().unwrap_or(0);
            let Some(responder) = cal_responder.get().cloned() else {
                warn!("impl: calibrate before server start");
                return;
            };
            let temp = cal_temp.clone();
            info!("impl: {} calibrate by {} (deferred)", ctx.session(), offset);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                let applied = temp.fetch_add(offset, Ordering::AcqRel) + offset;
                responder.respond(
                    command,
                    Reply::empty()
                        .with_output(0, applied)
                        .with_output(1, "calibrated off-thread"),
                );
            });
        })
        .advertise()?;

    let _ = responder_slot.set(server.responder());
    Ok(server)
}

// ── Client side ───────────────────────────────────────────────

fn run_client(handle: &ServerHandle, schema: &InterfaceSchema) -> Result<()> {
    let mut client = handle.connect(schema)?;
    info!("client: connected as {}", client.session());

    let temp = client.call(GET_TEMP, 0, &[])?;
    info!("client: GetTemp -> {:?}", temp.result);

    let added = client.call(
        ADD_ALARM_HANDLER,
        0,
        &[Value::I32(40), Value::Reference(0xC0FFEE)],
    )?;
    let alarm = added.result.and_then(|v| v.as_reference()).unwrap_or(0);
    if alarm == 0 {
        bail!("alarm registration refused");
    }
    info!("client: alarm handle {:#x}", alarm);

    let cal = client.call(CALIBRATE, 0b11, &[Value::I32(1)])?;
    info!("client: Calibrate -> {:?}", cal.outputs);

    let (id, event) = client.wait_event()?;
    info!(
        "client: event on op {} context {:#x}: {:?}",
        id, event.context, event.params
    );

    client.call(REMOVE_ALARM_HANDLER, 0, &[Value::Reference(alarm)])?;
    info!("client: alarm removed, {} subscriptions left", handle.subscriptions_for(client.session()));

    // Same interface over a byte pipe.
    let (near, far) = MemoryPipe::pair();
    let reader = handle.attach(far)?;
    let reader_thread = thread::spawn(move || reader.run());
    let mut remote = RemoteClient::connect(near, schema.clone())?;
    let txn = remote.send_call(GET_TEMP, 0, &[])?;
    let response = loop {
        remote.pump()?;
        if let Some(r) = remote.take_response(txn) {
            break r;
        }
        thread::sleep(Duration::from_millis(1));
    };
    info!("client: remote GetTemp -> {:?}", response.result);
    remote.close();
    if reader_thread.join().is_err() {
        bail!("reader thread panicked");
    }

    drop(client);
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────

fn load_config() -> Result<BindingConfig> {
    let config = match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            BindingConfig::from_json(&text).with_context(|| format!("parsing config {path}"))?
        }
        None => BindingConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let config = load_config()?;
    console_log::init(config.level_filter()).map_err(|e| anyhow!(e))?;

    info!("ifbind demo v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "service `{}`, {} sessions, {} commands, {} subscriptions",
        config.service_name,
        config.max_sessions,
        config.command_pool_size,
        config.subscription_pool_size
    );

    let temp = Arc::new(AtomicI32::new(37));
    let alarms: Alarms = Arc::new(Mutex::new(RefCell::new(Vec::new())));
    let stop = Arc::new(AtomicBool::new(false));

    let mut server = build_server(config, &temp, &alarms)?;
    let handle = server.handle();

    let sensor = {
        let (temp, alarms, stop) = (temp.clone(), alarms.clone(), stop.clone());
        thread::spawn(move || sensor_loop(&temp, &alarms, &stop))
    };
    let client = {
        let handle = handle.clone();
        thread::spawn(move || {
            let outcome = run_client(&handle, &thermal_schema());
            handle.shutdown();
            outcome
        })
    };

    server.run();

    stop.store(true, Ordering::Release);
    if sensor.join().is_err() {
        bail!("sensor thread panicked");
    }
    match client.join() {
        Ok(outcome) => outcome?,
        Err(_) => bail!("client thread panicked"),
    }
    info!("final pools: {:?}", handle.stats());
    Ok(())
}
