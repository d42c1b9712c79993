use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mocha-e2e-{}-{}", std::process::id(), name));
    fs::create_dir_all(&dir).expect("Cannot create scratch directory");
    dir
}

fn run_program(name: &str, source: &str) -> Output {
    let dir = scratch_dir(name);
    let script = dir.join("program.mocha");
    fs::write(&script, source).expect("Cannot write test program");

    Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .arg(&script)
        .output()
        .expect("Failed to run interpreter")
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

#[test]
fn prints_arithmetic() {
    let output = run_program("arithmetic", "print 1 + 2;");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "3\n");
}

#[test]
fn concatenates_strings() {
    let output = run_program(
        "concat",
        "var a = \"hi\"; var b = \"!\"; print a + b;",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "hi!\n");
}

#[test]
fn computes_fibonacci_recursively() {
    let output = run_program(
        "fib",
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(10);",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "55\n");
}

#[test]
fn closures_keep_private_state() {
    let output = run_program(
        "counter",
        "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; } \
         var counter = makeCounter(); print counter(); print counter();",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "1\n2\n");
}

#[test]
fn methods_read_instance_fields() {
    let output = run_program(
        "methods",
        "class A { greet() { print \"hi \" + this.name; } } \
         var a = A(); a.name = \"Mocha\"; a.greet();",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "hi Mocha\n");
}

#[test]
fn inheritance_and_super_initializers() {
    let output = run_program(
        "inheritance",
        "class A { init(x) { this.x = x; } } \
         class B < A { init(x) { super.init(x); this.y = x + 1; } } \
         var b = B(10); print b.x; print b.y;",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "10\n11\n");
}

#[test]
fn truthiness_of_double_negation() {
    let output = run_program(
        "truthiness",
        "print !!0; print !!\"\"; print !!nil; print !!false; print !!true;",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "true\ntrue\nfalse\nfalse\ntrue\n");
}

#[test]
fn while_and_for_loops_run() {
    let output = run_program(
        "loops",
        "var total = 0; for (var i = 0; i < 5; i = i + 1) { total = total + i; } print total; \
         var n = 3; while (n > 0) { print n; n = n - 1; }",
    );
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "10\n3\n2\n1\n");
}

#[test]
fn type_error_exits_70_with_message() {
    let output = run_program("type-error", "print 1 + \"x\";");
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("Operands must be two numbers or two strings."));
    assert!(stderr.contains("[line 1] in script"));
}

#[test]
fn calling_a_non_callable_exits_70() {
    let output = run_program("uncallable", "var a; a();");
    assert_eq!(output.status.code(), Some(70));
    assert!(stderr_of(&output).contains("Can only call functions and classes."));
}

#[test]
fn inheriting_from_a_value_exits_70() {
    let output = run_program(
        "bad-superclass",
        "class A {} var NotAClass = 1; class B < NotAClass {}",
    );
    assert_eq!(output.status.code(), Some(70));
    assert!(stderr_of(&output).contains("Superclass must be a class."));
}

#[test]
fn initializer_returning_a_value_exits_65() {
    let output = run_program(
        "init-return",
        "fun f() { return; } class A { init() { return 1; } }",
    );
    assert_eq!(output.status.code(), Some(65));
    assert!(stderr_of(&output).contains("Can't return a value from an initializer."));
}

#[test]
fn undefined_variable_reports_name_and_trace() {
    let output = run_program(
        "undefined",
        "fun touch() { print missing; } touch();",
    );
    assert_eq!(output.status.code(), Some(70));
    let stderr = stderr_of(&output);
    assert!(stderr.contains("Undefined variable 'missing'."));
    assert!(stderr.contains("in touch()"));
    assert!(stderr.contains("in script"));
}

#[test]
fn compile_errors_report_every_statement() {
    let output = run_program("cascade", "var 1 = 2; print 3 +; var ok = 4;");
    assert_eq!(output.status.code(), Some(65));
    let stderr = stderr_of(&output);
    // Panic-mode recovery reaches both broken statements.
    assert!(stderr.contains("Expect variable name."));
    assert!(stderr.contains("Expect expression."));
}

#[test]
fn missing_file_exits_74() {
    let dir = scratch_dir("missing-file");
    let output = Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .arg("does-not-exist.mocha")
        .output()
        .expect("Failed to run interpreter");
    assert_eq!(output.status.code(), Some(74));
}

#[test]
fn writes_serialized_artifact_before_running() {
    let dir = scratch_dir("artifact");
    let script = dir.join("program.mocha");
    fs::write(&script, "fun f() { return 1; } print f();").expect("Cannot write test program");

    let output = Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .arg(&script)
        .output()
        .expect("Failed to run interpreter");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));

    let artifact = dir.join("VMDataFile.txt");
    let metadata = fs::metadata(&artifact).expect("artifact missing");
    assert!(metadata.len() > 0);
}

#[test]
fn artifact_flag_overrides_output_path() {
    let dir = scratch_dir("artifact-flag");
    let script = dir.join("program.mocha");
    fs::write(&script, "print nil;").expect("Cannot write test program");

    let output = Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .arg(&script)
        .arg("--artifact")
        .arg("snapshot.bin")
        .output()
        .expect("Failed to run interpreter");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "nil\n");
    assert!(dir.join("snapshot.bin").exists());
    assert!(!dir.join("VMDataFile.txt").exists());
}

#[test]
fn repl_evaluates_lines_and_keeps_globals() {
    let dir = scratch_dir("repl");
    let mut child = Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start repl");

    child
        .stdin
        .as_mut()
        .expect("no stdin")
        .write_all(b"var a = 40;\nprint a + 2;\n")
        .expect("Cannot write to repl");

    let output = child.wait_with_output().expect("Failed to wait for repl");
    assert!(output.status.success());
    assert!(stdout_of(&output).contains("42"));
}

#[test]
fn gc_stress_mode_runs_programs_to_completion() {
    // Heap churn alone rarely crosses the growth-based trigger in a short
    // program; stress mode collects at every allocation checkpoint instead.
    let dir = scratch_dir("gc-stress-clean");
    let script = dir.join("program.mocha");
    fs::write(
        &script,
        "fun makeAdder(n) { fun adder(x) { return x + n; } return adder; } \
         var total = 0; \
         for (var i = 0; i < 50; i = i + 1) { \
             var add = makeAdder(i); \
             var s = \"tmp\" + \"string\"; \
             total = total + add(i); \
         } print total;",
    )
    .expect("Cannot write test program");

    let output = Command::new(env!("CARGO_BIN_EXE_mocha"))
        .current_dir(&dir)
        .env("MOCHA_GC_STRESS", "1")
        .arg(&script)
        .output()
        .expect("Failed to run interpreter");
    assert!(output.status.success(), "stderr: {}", stderr_of(&output));
    assert_eq!(stdout_of(&output), "2450\n");
}
