use retrace::{MAX_FRAMES, StackTrace};

#[inline(never)]
fn innermost_probe() -> StackTrace {
    StackTrace::capture()
}

#[inline(never)]
fn outer_probe() -> StackTrace {
    innermost_probe()
}

fn render(trace: &StackTrace, ignore_frames: usize) -> String {
    let mut out = String::new();
    trace.write_to(&mut out, ignore_frames).unwrap();
    out
}

fn frame_lines(rendered: &str) -> Vec<&str> {
    rendered.lines().filter(|l| l.starts_with('\t')).collect()
}

#[test]
fn capture_is_bounded() {
    let trace = innermost_probe();
    assert!(trace.len() <= MAX_FRAMES);
    assert_eq!(trace.frames().len(), trace.len());
}

#[test]
fn back_to_back_captures_have_similar_depth() {
    let first = innermost_probe();
    let second = innermost_probe();
    assert!(
        first.len().abs_diff(second.len()) <= 2,
        "depths diverged: {} vs {}",
        first.len(),
        second.len()
    );
}

#[test]
fn report_has_header_and_trailing_blank_line() {
    let rendered = render(&innermost_probe(), 0);
    assert!(rendered.starts_with("Stacktrace:\n"));
    assert!(rendered.ends_with("\n\n"));
}

#[test]
fn ignore_frames_arithmetic_holds_for_every_k() {
    let trace = innermost_probe();
    let n = trace.len();
    for k in 0..n + 2 {
        let rendered = render(&trace, k);
        let lines = frame_lines(&rendered);
        assert_eq!(lines.len(), n.saturating_sub(k), "k = {k}");
        for (i, line) in lines.iter().enumerate() {
            assert!(
                line.starts_with(&format!("\t({i}) ")),
                "line {i} misnumbered: {line:?}"
            );
        }
    }
}

#[test]
fn ignoring_more_than_captured_is_not_an_error() {
    let trace = innermost_probe();
    let rendered = render(&trace, trace.len() + 10);
    assert!(frame_lines(&rendered).is_empty());
    assert!(rendered.starts_with("Stacktrace:\n"));
}

#[test]
fn descriptors_are_never_empty() {
    let trace = innermost_probe();
    for line in frame_lines(&render(&trace, 0)) {
        let descriptor = line.split_once(") ").map(|(_, d)| d).unwrap_or("");
        assert!(!descriptor.trim().is_empty(), "empty descriptor in {line:?}");
    }
}

#[test]
fn display_matches_write_to_with_one_ignored_frame() {
    let trace = innermost_probe();
    assert_eq!(format!("{trace}"), render(&trace, 1));
}

#[test]
fn formatting_is_repeatable_and_does_not_mutate() {
    let trace = innermost_probe();
    let frames_before: Vec<usize> = trace.frames().to_vec();
    let first = render(&trace, 0);
    let second = render(&trace, 0);
    assert_eq!(first, second);
    assert_eq!(trace.frames(), frames_before.as_slice());
}

#[test]
fn concurrent_formatting_of_one_trace_is_safe() {
    let trace = innermost_probe();
    let reference = render(&trace, 0);
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                assert_eq!(render(&trace, 0), reference);
            });
        }
    });
}

#[test]
fn unavailable_configurations_render_the_marker() {
    if StackTrace::capabilities().symbolication {
        return;
    }
    let rendered = render(&innermost_probe(), 0);
    assert!(rendered.contains("(not available)"));
    assert!(frame_lines(&rendered).is_empty());
}

#[cfg(all(
    target_os = "linux",
    target_env = "gnu",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
mod linux {
    use super::*;

    #[test]
    fn nested_calls_resolve_innermost_first() {
        let trace = outer_probe();
        assert!(!trace.is_empty(), "frame-pointer walk found nothing");

        let rendered = render(&trace, 0);
        let inner = rendered
            .find("innermost_probe")
            .expect("innermost frame resolves by name");
        let outer = rendered
            .find("outer_probe")
            .expect("outer frame resolves by name");
        assert!(inner < outer, "innermost frame must print first");

        let first = frame_lines(&rendered)[0].to_owned();
        assert!(
            first.contains("innermost_probe"),
            "frame 0 should be the capturing function: {first:?}"
        );
    }

    #[test]
    fn fault_context_trace_formats_like_a_normal_one() {
        let mut uc: libc::ucontext_t = unsafe { std::mem::zeroed() };
        assert_eq!(unsafe { libc::getcontext(&mut uc) }, 0);

        let ctx = unsafe { retrace::FaultContext::from_ucontext(&raw const uc) };
        let trace = StackTrace::from_fault_context(&ctx);
        assert!(!trace.is_empty());

        let rendered = render(&trace, 0);
        assert!(rendered.starts_with("Stacktrace:\n"));
        assert!(!frame_lines(&rendered).is_empty());
    }
}
