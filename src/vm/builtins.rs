use std::io::{self, Write};

use crate::value::Value;

/// Run the built-in `name` if there is one. Arguments are written in order,
/// separated by single spaces.
pub fn call<W: Write>(name: &str, args: &[Value], out: &mut W) -> Option<io::Result<()>> {
    let newline = match name {
        "print" => false,
        "println" => true,
        _ => return None,
    };
    Some(write_args(args, newline, out))
}

fn write_args<W: Write>(args: &[Value], newline: bool, out: &mut W) -> io::Result<()> {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.write_all(b" ")?;
        }
        write!(out, "{}", arg)?;
    }
    if newline {
        out.write_all(b"\n")?;
    }
    out.flush()
}
