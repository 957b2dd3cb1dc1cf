//! Capture inside nested calls and print the rendered report twice: once via
//! `Display` (which hides the printing frame) and once in full.

use retrace::StackTrace;

#[inline(never)]
fn checkout() -> StackTrace {
    StackTrace::capture()
}

#[inline(never)]
fn handle_request() -> StackTrace {
    checkout()
}

fn main() {
    tracing_subscriber::fmt::init();

    let caps = StackTrace::capabilities();
    println!(
        "backend: {} (fault context: {}, symbolication: {})",
        caps.backend, caps.fault_context, caps.symbolication
    );

    let trace = handle_request();
    println!("captured {} frames", trace.len());

    print!("{trace}");

    let mut full = String::new();
    trace.write_to(&mut full, 0).unwrap();
    print!("{full}");
}
