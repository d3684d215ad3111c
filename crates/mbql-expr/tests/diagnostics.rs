//! End-to-end diagnostics over expression source text

use mbql_expr::diagnostics::{check_number_exponent, Checker};
use mbql_expr::{check_source, Diagnostic, DiagnosticKind, DiagnosticPolicy, DiagnosticsPass, Token, TokenKind};

fn kinds(diagnostics: &[Diagnostic]) -> Vec<DiagnosticKind> {
    diagnostics.iter().map(|d| d.kind).collect()
}

#[test]
fn test_missing_exponent_in_call() {
    let source = r#"CONCAT("a", 1e)"#;
    let diagnostics = check_source(&DiagnosticsPass::default(), source).unwrap();

    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingExponent]);
    assert_eq!(diagnostics[0].message, "Missing exponent");
    assert_eq!(&source[diagnostics[0].start..diagnostics[0].end], "1e");
}

#[test]
fn test_well_formed_expressions_pass() {
    let pass = DiagnosticsPass::default();
    for source in [
        "1E10",
        "[Subtotal] * 1.5e-2",
        r#"concat([First Name], " ", [Last Name])"#,
        "case([Total] > 100, \"big\", \"small\")",
        "coalesce([Discount], 0) + (1 - 2)",
        "[Total] > 100 AND NOT isnull([Discount])",
        "",
    ] {
        assert!(check_source(&pass, source).unwrap().is_empty(), "{source}");
    }
}

#[test]
fn test_malformed_exponent_from_tokens() {
    // The grammar never produces this token; build it by hand.
    let tokens = vec![Token::new(TokenKind::Number, "1e5e3", 0, 5)];
    let diagnostics = DiagnosticsPass::default().run(&tokens);
    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MalformedExponent]);
}

#[test]
fn test_double_exponent_reads_as_missing_comma() {
    // `1e5e3` lexes as the number `1e5` followed by the name `e3`.
    let diagnostics = check_source(&DiagnosticsPass::default(), "1e5e3").unwrap();
    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingComma]);
    assert_eq!(diagnostics[0].start, 3);
}

#[test]
fn test_missing_comma_outside_calls() {
    let pass = DiagnosticsPass::default();
    for (source, start) in [("[Total] 2", 8), ("(1 + [A] [B])", 9), ("lower([A]) [B]", 11)] {
        let diagnostics = check_source(&pass, source).unwrap();
        assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingComma], "{source}");
        assert_eq!(diagnostics[0].start, start, "{source}");
    }
}

#[test]
fn test_collect_all_sorts_by_position() {
    let source = r#"concat("a" "b", 1e"#;
    let diagnostics = check_source(&DiagnosticsPass::new(DiagnosticPolicy::CollectAll), source).unwrap();

    assert_eq!(
        kinds(&diagnostics),
        vec![
            DiagnosticKind::MissingClosingParenthesis,
            DiagnosticKind::MissingComma,
            DiagnosticKind::MissingExponent,
        ]
    );
    let starts: Vec<_> = diagnostics.iter().map(|d| d.start).collect();
    assert_eq!(starts, vec![6, 11, 16]);
}

#[test]
fn test_first_error_stops_at_first_checker() {
    let source = r#"concat("a" "b", 1e"#;
    let diagnostics = check_source(&DiagnosticsPass::new(DiagnosticPolicy::FirstError), source).unwrap();
    assert_eq!(kinds(&diagnostics), vec![DiagnosticKind::MissingExponent]);
}

#[test]
fn test_unterminated_and_stray_characters() {
    let pass = DiagnosticsPass::default();
    let cases = [
        ("[Total + 1", DiagnosticKind::MissingClosingBracket),
        ("lower(\"abc)", DiagnosticKind::MissingClosingQuote),
        ("1 # 2", DiagnosticKind::UnexpectedCharacter),
        ("1 + 2)", DiagnosticKind::UnexpectedClosingParenthesis),
    ];
    for (source, expected) in cases {
        let diagnostics = check_source(&pass, source).unwrap();
        assert!(kinds(&diagnostics).contains(&expected), "{source}: {diagnostics:?}");
    }
}

#[test]
fn test_custom_checker_list() {
    let pass = DiagnosticsPass::with_checkers(
        DiagnosticPolicy::CollectAll,
        vec![("number-exponent", check_number_exponent as Checker)],
    );
    assert_eq!(pass.checker_names().collect::<Vec<_>>(), vec!["number-exponent"]);
    assert!(check_source(&pass, "1 2").unwrap().is_empty());
}

#[test]
fn test_render_points_at_token() {
    let source = "[Price]\n  * 2e";
    let diagnostics = check_source(&DiagnosticsPass::default(), source).unwrap();
    assert_eq!(
        diagnostics[0].render(source),
        "Error at line 2, column 5:\n  * 2e\n    ^^\nMissing exponent"
    );
    assert_eq!(diagnostics[0].to_string(), "Missing exponent at 12..14");
}

#[test]
fn test_policy_parses_from_config_names() {
    assert_eq!("first-error".parse::<DiagnosticPolicy>(), Ok(DiagnosticPolicy::FirstError));
    assert_eq!(DiagnosticPolicy::CollectAll.to_string(), "collect-all");
    assert!("sometimes".parse::<DiagnosticPolicy>().is_err());
}
