//! Tests for YAML registry documents run end to end

mod common;

use attrgraph::{Document, Outcome, Runner};
use serde_json::json;

const PI_TAU: &str = r#"
schema: attrgraph/registry@0.1
resolvers:
  - id: pi
    output: [pi]
    value: {pi: 3.14159}
  - id: tau
    input: [pi]
    output: [tau]
    product: {tau: [pi, 2]}
request: [tau]
"#;

const WIDTH_AREA: &str = r#"
schema: attrgraph/registry@0.1
resolvers:
  - id: width
    input: [x, x2]
    output: [width]
    product: {width: [x, x2]}
  - id: area
    input: [width, height]
    output: [area]
    product: {area: [width, height]}
request: [area]
"#;

// =============================================================================
// TEST 1: Parsing
// =============================================================================

mod parsing {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_pi_tau() {
        let doc = Document::parse(PI_TAU).unwrap();
        assert_eq!(doc.resolvers.len(), 2);
        assert_eq!(doc.request.attrs().count(), 1);
        assert_eq!(doc.index().resolver_count(), 2);
    }

    #[test]
    fn test_wrong_schema_rejected() {
        let yaml = PI_TAU.replace("registry@0.1", "registry@9.9");
        let err = Document::parse(&yaml).unwrap_err();
        assert_eq!(err.code(), "AG-091");
        assert!(err.to_string().contains("registry@9.9"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = format!("{}\nextra: true\n", PI_TAU);
        let err = Document::parse(&yaml).unwrap_err();
        assert_eq!(err.code(), "AG-091");
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Document::load(&dir.path().join("absent.yaml")).unwrap_err();
        assert_eq!(err.code(), "AG-092");
    }
}

// =============================================================================
// TEST 2: Running documents
// =============================================================================

mod running {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_pi_tau_document() {
        let doc = Document::parse(PI_TAU).unwrap();
        let out = Runner::new(doc.index()).run(&doc.request, doc.data.clone()).await;

        let tau = out.result["tau"].as_f64().unwrap();
        assert!((tau - 6.28318).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_width_area_success() {
        let yaml = format!("{}data: {{x: 2, x2: 3, height: 4}}\n", WIDTH_AREA);
        let doc = Document::parse(&yaml).unwrap();
        let out = Runner::new(doc.index()).run(&doc.request, doc.data.clone()).await;

        assert_eq!(out.result["area"], json!(24.0));
    }

    #[tokio::test]
    async fn test_width_area_missing_input_is_ancestor_failure() {
        let yaml = format!("{}data: {{x: 2, x2: \"wide\", height: 4}}\n", WIDTH_AREA);
        let doc = Document::parse(&yaml).unwrap();
        let out = Runner::new(doc.index()).run(&doc.request, doc.data.clone()).await;

        assert!(!out.result.contains_key("area"));
        match out.outcome("area") {
            Outcome::Ancestor { error, .. } => {
                assert_eq!(error.code(), "AG-020");
                assert!(error.to_string().contains("'x2' is not numeric"));
            }
            other => panic!("expected Ancestor, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_document_mutation_and_fallback() {
        let yaml = r#"
schema: attrgraph/registry@0.1
resolvers:
  - id: broken
    output: [greeting]
    priority: 5
    fail: upstream timeout
  - id: fallback
    output: [greeting]
    value: {greeting: hello}
mutations:
  - id: note/create
    output: [note/id, note/text]
    value: {note/id: 1}
request:
  - mutation: note/create
    params: {note/text: hi}
  - greeting
"#;
        let doc = Document::parse(yaml).unwrap();
        let out = Runner::new(doc.index()).run(&doc.request, doc.data.clone()).await;

        assert_eq!(out.result["greeting"], json!("hello"));
        assert_eq!(
            out.result["note/create"],
            json!({"note/id": 1, "note/text": "hi"})
        );
        assert_eq!(out.errors()[0].code(), "AG-020");
    }
}
