use proptest::prelude::*;
use testgen_code_cleaner::{ChangeKind, Cleaner, CleanerConfig};

/// One chunk of a generated test case body
#[derive(Debug, Clone)]
enum Segment {
    Step,
    Jump(u64),
    Restart,
    Poll,
    Guard,
    Local,
    /// Guard with no blank line after it
    TightGuard,
    /// Single statement with no blank line after it
    Spin,
}

fn segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        4 => Just(Segment::Step),
        1 => (10u64..80).prop_map(Segment::Jump),
        1 => Just(Segment::Restart),
        3 => Just(Segment::Poll),
        1 => Just(Segment::Guard),
        1 => Just(Segment::Local),
        2 => Just(Segment::TightGuard),
        3 => Just(Segment::Spin),
    ]
}

fn render(decls: &[(u8, u8)], segments: &[Segment], cut: Option<usize>) -> String {
    let mut text = String::from("variables\n{\n");
    for (name, init) in decls {
        text.push_str(&format!("  int v{name} = {init};\n"));
    }
    text.push_str("}\n\ntestcase TC_Generated()\n{\n");

    let mut label = 0u64;
    for seg in segments {
        match seg {
            Segment::Step | Segment::Jump(_) | Segment::Restart => {
                label = match seg {
                    Segment::Jump(by) => label + by,
                    Segment::Restart => 1,
                    _ => label + 1,
                };
                text.push_str(&format!(
                    "  // Step {label}: Action {}\n  output(msg{});\n\n",
                    label % 4,
                    label % 4
                ));
            }
            Segment::Poll => text.push_str("  output(msgPoll);\n  testWaitForTimeout(50);\n\n"),
            Segment::Guard => text.push_str("  if (ok) {\n    a();\n    b();\n  }\n\n"),
            Segment::Local => text.push_str("  int i = 0;\n\n"),
            Segment::TightGuard => text.push_str("  if (ok) {\n    a();\n    b();\n  }\n"),
            Segment::Spin => text.push_str("  output(msgSpin);\n"),
        }
    }
    text.push_str("}\n");

    match cut {
        Some(keep) => text.lines().take(keep).map(|l| format!("{l}\n")).collect(),
        None => text,
    }
}

fn document() -> impl Strategy<Value = String> {
    (
        prop::collection::vec((0u8..4, 0u8..2), 0..8),
        prop::collection::vec(segment(), 0..60),
        prop::option::of(0usize..300),
    )
        .prop_map(|(decls, segments, cut)| render(&decls, &segments, cut))
}

/// Longest streak of a line among the non-blank lines of `text`
fn longest_streak(text: &str, line: &str) -> usize {
    let mut best = 0;
    let mut streak = 0;
    for current in text.lines().filter(|l| !l.trim().is_empty()) {
        streak = if current.trim() == line { streak + 1 } else { 0 };
        best = best.max(streak);
    }
    best
}

fn brace_balance(text: &str) -> (usize, usize) {
    let mut depth = 0usize;
    let mut stray = 0usize;
    for ch in text.chars() {
        match ch {
            '{' => depth += 1,
            '}' if depth == 0 => stray += 1,
            '}' => depth -= 1,
            _ => {}
        }
    }
    (depth, stray)
}

proptest! {
    #[test]
    fn proptest_clean_is_idempotent(doc in document()) {
        let cleaner = Cleaner::new(CleanerConfig::default()).unwrap();
        let once = cleaner.clean(&doc);
        let twice = cleaner.clean(&once.cleaned_text);
        prop_assert_eq!(&twice.cleaned_text, &once.cleaned_text);
        prop_assert!(twice.change_log.is_empty(), "second run logged {:?}", twice.change_log);
    }

    #[test]
    fn proptest_output_braces_balanced(doc in document()) {
        let cleaner = Cleaner::new(CleanerConfig::default()).unwrap();
        let out = cleaner.clean(&doc);
        prop_assert_eq!(brace_balance(&out.cleaned_text), (0, 0));
    }

    #[test]
    fn proptest_declarations_unique_per_scope(doc in document()) {
        let cleaner = Cleaner::new(CleanerConfig::default()).unwrap();
        let out = cleaner.clean(&doc);
        let report = cleaner.analyze(&out.cleaned_text);
        prop_assert!(report.duplicates.is_empty(), "duplicates left: {:?}", report.duplicates);
    }

    #[test]
    fn proptest_step_ceiling_holds(doc in document(), ceiling in 5u64..250) {
        let config = CleanerConfig { step_ceiling: ceiling, ..Default::default() };
        let cleaner = Cleaner::new(config).unwrap();
        let out = cleaner.clean(&doc);

        prop_assert!(out.count(ChangeKind::StepCeilingReached) <= 1);
        let report = cleaner.analyze(&out.cleaned_text);
        prop_assert!(report.max_step.unwrap_or(0) <= ceiling);
        prop_assert!(out.step_blocks.windows(2).all(|w| w[0].label <= w[1].label));
    }

    #[test]
    fn proptest_repetition_bounded(doc in document(), threshold in 1usize..5) {
        let config = CleanerConfig { repetition_threshold: threshold, ..Default::default() };
        let cleaner = Cleaner::new(config).unwrap();
        let out = cleaner.clean(&doc);

        prop_assert!(out.cleaned_text.matches("b();").count() <= threshold);
        prop_assert!(longest_streak(&out.cleaned_text, "output(msgSpin);") <= threshold);
        let again = cleaner.clean(&out.cleaned_text);
        prop_assert_eq!(again.count(ChangeKind::RepeatedBlockTruncated), 0);
    }
}
