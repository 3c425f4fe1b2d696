//! Host-side API coverage: marshalling, registration, host-initiated
//! calls, and output redirection.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use anyhow::Result;
use indoc::indoc;

use pyrite::{EvalError, Interpreter, Library, Value};

#[test]
fn native_int_signature_round_trips_and_truncates_floats() -> Result<()> {
    let mut interp = Interpreter::new();
    interp.register_func("imul", "imul(a, b) -> int", |call| {
        let a = call.args.int_at(0, "a")?;
        let b = call.args.int_at(1, "b")?;
        Ok(Value::Int(a * b))
    });

    assert_eq!(interp.eval("imul(6, 7)")?.as_int().unwrap(), 42);
    // A float where an int is declared coerces by truncation toward zero.
    assert_eq!(interp.eval("imul(6.9, 7)")?.as_int().unwrap(), 42);
    assert_eq!(interp.eval("imul(-6.9, 7)")?.as_int().unwrap(), -42);

    let err = interp.eval("imul('6', 7)").unwrap_err();
    assert!(err.to_string().contains("'a' expects int"));
    Ok(())
}

#[test]
fn script_mutates_a_host_provided_list_in_place() -> Result<()> {
    let mut interp = Interpreter::new();
    interp.set_var("xs", vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    let length = interp.eval("xs.append(4)\nlen(xs)")?;
    assert_eq!(length.as_int().unwrap(), 4);
    assert_eq!(interp.get_var_as_list("xs").unwrap().len(), 4);
    Ok(())
}

#[test]
fn registered_library_supports_attribute_and_from_import() -> Result<()> {
    let mut interp = Interpreter::new();
    let mut strings = Library::new("strings").with_description("string helpers");
    strings.add_constant("empty", Value::str(""));
    strings.add_function("shout", "shout(s) -> str", |call| {
        Ok(Value::Str(call.args.str_at(0, "s")?.to_uppercase()))
    });
    interp.register_library(strings);

    let value = interp.eval(indoc! {"
        import strings
        strings.shout('hey')
    "})?;
    assert_eq!(value.to_string(), "HEY");

    let value = interp.eval(indoc! {"
        from strings import shout
        shout('quiet')
    "})?;
    assert_eq!(value.to_string(), "QUIET");
    Ok(())
}

#[test]
fn sub_library_is_reachable_through_its_parent() -> Result<()> {
    let mut interp = Interpreter::new();
    interp.register_library(Library::new("net"));
    let mut http = Library::new("http");
    http.add_constant("default_port", Value::Int(80));
    interp.register_sub_library("net", http)?;

    let value = interp.eval("import net\nnet.http.default_port")?;
    assert_eq!(value.as_int().unwrap(), 80);

    let missing = interp.register_sub_library("absent", Library::new("x"));
    assert!(missing.is_err());
    Ok(())
}

#[test]
fn unknown_import_is_an_import_error() {
    let mut interp = Interpreter::new();
    let err = interp.eval("import ghosts").unwrap_err();
    assert!(err.to_string().contains("no library named 'ghosts'"));
}

#[test]
fn host_invokes_script_callables_with_marshalled_values() -> Result<()> {
    let mut interp = Interpreter::new();
    interp.eval(indoc! {"
        def clamp(x, low=0, high=100):
            if x < low:
                return low
            if x > high:
                return high
            return x

        class Accumulator:
            def __init__(self, start):
                self.total = start
            def add(self, n):
                self.total += n
                return self.total
    "})?;

    let clamped = interp.call_function("clamp", vec![Value::Int(250)])?;
    assert_eq!(clamped.as_int().unwrap(), 100);

    let acc = interp.create_instance("Accumulator", vec![Value::Int(10)])?;
    interp.call_method(&acc, "add", vec![Value::Int(5)])?;
    let total = interp.call_method(&acc, "add", vec![Value::Int(7)])?;
    assert_eq!(total.as_int().unwrap(), 22);
    Ok(())
}

struct SharedSink(Rc<RefCell<Vec<u8>>>);

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn custom_writer_receives_print_output() -> Result<()> {
    let sink = Rc::new(RefCell::new(Vec::new()));
    let mut interp = Interpreter::new();
    interp.set_output_writer(Box::new(SharedSink(Rc::clone(&sink))));
    interp.eval("print('routed')")?;
    assert_eq!(String::from_utf8(sink.borrow().clone())?, "routed\n");
    Ok(())
}

#[test]
fn partial_output_survives_a_runtime_failure() {
    let mut interp = Interpreter::new();
    interp.capture_output();
    let err = interp
        .eval("print('first')\nprint(broken)\nprint('never')")
        .unwrap_err();
    assert!(matches!(err, EvalError::Exception(_)));
    assert_eq!(interp.take_output(), "first\n");
}

#[test]
fn uncaught_system_exit_reports_its_code() {
    let mut interp = Interpreter::new();
    let err = interp.eval("exit(9)").unwrap_err();
    assert!(matches!(err, EvalError::Exit { code: 9 }));

    // Catchable from script like any other exception.
    let mut interp = Interpreter::new();
    let value = interp
        .eval(indoc! {"
            result = 'unset'
            try:
                exit(9)
            except as e:
                result = 'caught'
            result
        "})
        .unwrap();
    assert_eq!(value.to_string(), "caught");
}

#[test]
fn interpreters_do_not_share_global_state() -> Result<()> {
    let mut first = Interpreter::new();
    let mut second = Interpreter::new();
    first.eval("marker = 'one'")?;
    assert!(second.eval("marker").is_err());
    assert_eq!(first.get_var_as_string("marker").as_deref(), Some("one"));
    Ok(())
}
