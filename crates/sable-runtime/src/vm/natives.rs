//! Native functions seeded into the globals table

use std::rc::Rc;
use std::time::Instant;

use super::Vm;
use crate::object::NativeFn;
use crate::value::Value;

/// Install the built-in natives before any script executes
///
/// `clock` returns elapsed process time in seconds as a float, measured from
/// VM construction.
pub(super) fn install(vm: &mut Vm) {
    let start = Instant::now();
    let clock = NativeFn::new("clock", move |_args| {
        Ok(Value::Float(start.elapsed().as_secs_f64()))
    });
    let name = vm.interner.intern(clock.name);
    vm.globals.insert(name, Value::Native(Rc::new(clock)));
}
