use std::io::Write;
use std::process::{Command, Output};

fn minic(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_minic")).args(args).output().expect("failed to run minic")
}

fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}

const SQUARE: &str = "
int square(int n) {
    return n * n;
}
void main() {
    int r = square(12);
    println(r);
}
";

#[test]
fn runs_a_source_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(SQUARE.as_bytes()).unwrap();
    let out = minic(&[file.path().to_str().unwrap()]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "144\n");
}

#[test]
fn runs_inline_source() {
    let out = minic(&["int a = 4; int b = a + 1; println(b);"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "5\n");
}

#[test]
fn emit_ast_prints_json() {
    let out = minic(&["--emit", "ast", "int a = 4;"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert!(v["items"].is_array());
}

#[test]
fn emit_disasm_lists_instructions() {
    let out = minic(&["--emit", "disasm", SQUARE]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("MARK"), "{}", text);
    assert!(text.contains("ENTER"), "{}", text);
    assert!(text.contains("CALL"), "{}", text);
    assert!(text.trim_end().ends_with("HALT"), "{}", text);
}

#[test]
fn emit_json_is_an_array() {
    let out = minic(&["--emit", "json", "int a = 1;"]);
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    let entries = v.as_array().unwrap();
    assert_eq!(entries[0]["opcode"], "LOAD_CONST");
    assert_eq!(entries.last().unwrap()["opcode"], "HALT");
}

#[test]
fn emit_hex_dumps_bytes() {
    let out = minic(&["--emit", "hex", "int a = 1;"]);
    assert!(out.status.success());
    // LOAD_CONST int 1
    assert!(stdout(&out).starts_with("01 00 01 00 00 00"), "{}", stdout(&out));
}

#[test]
fn compile_error_exits_nonzero_with_code() {
    let out = minic(&["--no-color", "void main() { int x = y; }"]);
    assert!(!out.status.success());
    let err = stderr(&out);
    assert!(err.contains("error[MC-C014]"), "{}", err);
    assert!(err.contains("-->"), "{}", err);
}

#[test]
fn json_diagnostics() {
    let out = minic(&["--diagnostics", "json", "int x = @;"]);
    assert!(!out.status.success());
    let line = stderr(&out).lines().find(|l| l.starts_with('{')).map(str::to_string).unwrap();
    let v: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(v["severity"], "error");
    assert_eq!(v["code"], "MC-L001");
}

#[test]
fn runtime_fault_is_a_warning() {
    let out = minic(&["--no-color", "int z = 1 / 0; println(\"done\");"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out), "done\n");
    assert!(stderr(&out).contains("warning[MC-W005]"), "{}", stderr(&out));
}

#[test]
fn custom_entry_function() {
    let source = "void start() { println(\"from start\"); } void main() { println(\"from main\"); }";
    let out = minic(&["--entry", "start", source]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "from start\n");
}

#[test]
fn expression_call_argument_is_rejected() {
    let out = minic(&["--no-color", "int a = 4; println(a + 1);"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("error[MC-C002]"), "{}", stderr(&out));
}
