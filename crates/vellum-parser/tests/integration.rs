use vellum_parser::{
    parse, resolve_directives, scan_model_type, ControlKind, DirectiveKind, ModelBinding, Segment,
    SyntaxError,
};

fn parsed(source: &str) -> Vec<Segment> {
    parse(source).expect("source should parse")
}

#[test]
fn full_template_segments_in_order() {
    let source = "@inherits TemplateBase<Person>\n\
                  Hello @Model.Name!\n\
                  @foreach (i in Model.Ids) { @i }\n\
                  Contact: user@@example.com";
    let segments = parsed(source);

    let mut kinds = segments.iter();
    assert!(matches!(
        kinds.next(),
        Some(Segment::Directive { kind: DirectiveKind::Inherits, argument, .. })
            if argument == "TemplateBase<Person>"
    ));
    assert!(matches!(
        kinds.next(),
        Some(Segment::Literal { text, .. }) if text == "Hello "
    ));
    assert!(matches!(
        kinds.next(),
        Some(Segment::Expression { source, .. }) if source == "Model.Name"
    ));
    assert!(matches!(
        kinds.next(),
        Some(Segment::Literal { text, .. }) if text == "!\n"
    ));
    assert!(matches!(
        kinds.next(),
        Some(Segment::ControlOpen { kind: ControlKind::Foreach, expr, var, .. })
            if expr == "Model.Ids" && var.as_deref() == Some("i")
    ));
    assert!(matches!(
        kinds.next(),
        Some(Segment::Expression { source, .. }) if source == "i"
    ));
    assert!(matches!(kinds.next(), Some(Segment::ControlClose { .. })));
    // The escape collapses to a single '@' inside the trailing literal.
    assert!(matches!(
        kinds.next(),
        Some(Segment::Literal { text, .. }) if text == "\nContact: user@example.com"
    ));
    assert!(kinds.next().is_none());
}

#[test]
fn directive_resolution_strips_and_binds() {
    let source = "@inherits TemplateBase<Person>\nHello @Model.Name";
    let (binding, segments) = resolve_directives(parsed(source)).unwrap();
    assert_eq!(binding.type_name(), Some("Person"));
    assert!(segments
        .iter()
        .all(|segment| !matches!(segment, Segment::Directive { .. })));
}

#[test]
fn templates_without_a_directive_are_dynamic() {
    let (binding, _) = resolve_directives(parsed("Hello @Model.Name")).unwrap();
    assert!(matches!(binding, ModelBinding::Dynamic));
}

#[test]
fn element_type_annotations_are_accepted() {
    // Razor-style headers may carry an element type before the loop variable.
    let segments = parsed("@foreach(int i in Model.Ids) { @i }");
    assert!(matches!(
        &segments[0],
        Segment::ControlOpen { expr, var, .. }
            if expr == "Model.Ids" && var.as_deref() == Some("i")
    ));
}

#[test]
fn close_braces_outside_blocks_stay_literal() {
    let segments = parsed("fn main() { body }");
    assert_eq!(segments.len(), 1);
    assert!(matches!(
        &segments[0],
        Segment::Literal { text, .. } if text == "fn main() { body }"
    ));
}

#[test]
fn error_offsets_point_into_the_source() {
    let source = "leading text @";
    match parse(source).unwrap_err() {
        SyntaxError::ExpectedExpression { offset } => {
            assert_eq!(offset, source.len() - 1);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn model_type_scan_agrees_with_resolution() {
    let source = "@inherits TemplateBase<Person>\nHello";
    let scanned = scan_model_type(source);
    let (binding, _) = resolve_directives(parsed(source)).unwrap();
    assert_eq!(scanned.as_deref(), binding.type_name());

    assert_eq!(scan_model_type("no directive here"), None);
}
