//! Fuzz target: `unpack_call`
//!
//! Arbitrary request buffers against a schema with every parameter kind.
//! Unpacking must return a value or a `DecodeError`, never panic, and
//! anything it accepts must pack back to the same bytes.
//!
//! cargo fuzz run fuzz_unpack_call

#![no_main]

use ifbind::rpc::pack::{pack_call, unpack_call};
use ifbind::schema::{CallbackSpec, OperationSpec, ParamKind, ScalarKind};
use libfuzzer_sys::fuzz_target;

fn op() -> OperationSpec {
    OperationSpec::call(1, "Everything")
        .input("flag", ScalarKind::Bool)
        .input("small", ScalarKind::I8)
        .input("wide", ScalarKind::U64)
        .input("name", ParamKind::string(24))
        .input("samples", ParamKind::array(ScalarKind::I16, 8))
        .input("target", ParamKind::Reference)
        .callback("done", CallbackSpec::new("Done").param("code", ScalarKind::U32))
        .output("status", ScalarKind::U8)
        .output("detail", ParamKind::string(8))
}

fuzz_target!(|data: &[u8]| {
    let op = op();
    if let Ok(call) = unpack_call(&op, data) {
        let repacked = pack_call(&op, call.outputs_mask, &call.inputs);
        assert_eq!(repacked.as_slice(), data);
    }
});
