use std::collections::BTreeMap;

use serde::Serialize;

use crate::planner::types::{Point, UiElement, UiGraph};

const NOTABLE_ROLES: &[&str] = &["AXButton", "AXTextField", "AXMenuButton"];
const MAX_NOTABLE: usize = 10;
const MAX_RELEVANT: usize = 20;

const INTERACTIVE_ROLES: &[&str] = &[
    "AXButton",
    "AXTextField",
    "AXMenuButton",
    "AXLink",
    "AXTab",
    "AXMenuItem",
];
const MAX_INTERACTIVE_PER_APP: usize = 20;

#[derive(Serialize)]
struct RelevantElement<'a> {
    id: &'a str,
    role: Option<&'a str>,
    label: Option<&'a str>,
    title: Option<&'a str>,
    enabled: bool,
}

#[derive(Serialize)]
struct SelectableElement<'a> {
    id: &'a str,
    role: Option<&'a str>,
    label: Option<&'a str>,
    title: Option<&'a str>,
    enabled: bool,
    position: Option<Point>,
}

/// Application, element count, per-role counts and up to ten notable controls.
/// `active_application` names the app when the graph itself does not.
pub fn summarize_ui_graph(graph: &UiGraph, active_application: Option<&str>) -> String {
    let mut role_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for element in graph.elements.values() {
        *role_counts.entry(element.role_or_unknown()).or_default() += 1;
    }

    let notable: Vec<String> = graph
        .elements
        .values()
        .filter(|e| e.role.as_deref().is_some_and(|r| NOTABLE_ROLES.contains(&r)))
        .take(MAX_NOTABLE)
        .map(|e| {
            let label = e
                .label
                .as_deref()
                .filter(|l| !l.is_empty())
                .or(e.title.as_deref().filter(|t| !t.is_empty()))
                .unwrap_or("unlabeled");
            format!("{} '{}'", e.role_or_unknown(), label)
        })
        .collect();

    let types = role_counts
        .iter()
        .map(|(role, count)| format!("{role}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut summary = format!(
        "Application: {}\nTotal elements: {}\nElement types: {}\n",
        active_application.unwrap_or("Unknown"),
        graph.elements.len(),
        types
    );
    if !notable.is_empty() {
        summary.push_str(&format!("Key interactive elements: {}", notable.join(", ")));
    }
    summary
}

/// Elements whose label, title or value contains a task keyword (longer than two
/// characters, case-insensitive), as a JSON array of at most twenty entries.
pub fn relevant_elements(graph: &UiGraph, task: &str) -> String {
    let task_lower = task.to_lowercase();
    let keywords: Vec<&str> = task_lower.split_whitespace().filter(|w| w.chars().count() > 2).collect();

    let relevant: Vec<RelevantElement> = graph
        .elements
        .iter()
        .filter(|(_, element)| {
            let text = searchable_text(element);
            keywords.iter().any(|k| text.contains(k))
        })
        .take(MAX_RELEVANT)
        .map(|(id, e)| RelevantElement {
            id,
            role: e.role.as_deref(),
            label: e.label.as_deref(),
            title: e.title.as_deref(),
            enabled: e.is_enabled,
        })
        .collect();

    to_pretty_json(&relevant)
}

fn searchable_text(element: &UiElement) -> String {
    [
        element.label.clone(),
        element.title.clone(),
        element.value_text(),
    ]
    .into_iter()
    .flatten()
    .filter(|t| !t.is_empty())
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

/// Enabled interactive controls grouped by owning application, sorted by role then display
/// text, twenty per application.
pub fn interactive_elements_by_app(graph: &UiGraph) -> String {
    let mut by_app: BTreeMap<&str, Vec<&UiElement>> = BTreeMap::new();
    for element in graph.elements.values() {
        let interactive = element
            .role
            .as_deref()
            .is_some_and(|r| INTERACTIVE_ROLES.contains(&r));
        if interactive && element.is_enabled {
            let app = element.application_name.as_deref().unwrap_or("Unknown");
            by_app.entry(app).or_default().push(element);
        }
    }

    if by_app.is_empty() {
        return "No enabled interactive elements found.".to_string();
    }

    let mut sections = Vec::with_capacity(by_app.len());
    for (app, mut elements) in by_app {
        elements.sort_by_cached_key(|e| (e.role_or_unknown().to_string(), e.display_text()));
        let mut lines = vec![format!("{app}:")];
        lines.extend(
            elements
                .iter()
                .take(MAX_INTERACTIVE_PER_APP)
                .map(|e| format_interactive_line(e)),
        );
        if elements.len() > MAX_INTERACTIVE_PER_APP {
            lines.push(format!(
                "  ... and {} more",
                elements.len() - MAX_INTERACTIVE_PER_APP
            ));
        }
        sections.push(lines.join("\n"));
    }
    sections.join("\n\n")
}

fn format_interactive_line(element: &UiElement) -> String {
    let role = element.role_or_unknown();
    let text = element.display_text();
    let attr = if element.label.as_deref().is_some_and(|l| !l.is_empty()) {
        "label"
    } else if element.title.as_deref().is_some_and(|t| !t.is_empty()) {
        "title"
    } else {
        "value"
    };
    if text.is_empty() {
        format!("  - {}: {role}", element.id)
    } else {
        format!("  - {}: {role} {attr}:'{text}'", element.id)
    }
}

/// Candidate list for the element-selection prompt.
pub fn format_elements_for_selection(elements: &[UiElement]) -> String {
    let formatted: Vec<SelectableElement> = elements
        .iter()
        .map(|e| SelectableElement {
            id: &e.id,
            role: e.role.as_deref(),
            label: e.label.as_deref(),
            title: e.title.as_deref(),
            enabled: e.is_enabled,
            position: e.position,
        })
        .collect();
    to_pretty_json(&formatted)
}

fn to_pretty_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn element(id: &str, role: &str, label: &str, app: &str) -> UiElement {
        UiElement {
            id: id.into(),
            role: Some(role.into()),
            label: Some(label.into()),
            is_enabled: true,
            application_name: Some(app.into()),
            ..Default::default()
        }
    }

    fn graph(elements: Vec<UiElement>) -> UiGraph {
        UiGraph {
            elements: elements.into_iter().map(|e| (e.id.clone(), e)).collect(),
            root_elements: Vec::new(),
            active_application: Some("TestApp".into()),
        }
    }

    #[test]
    fn relevant_elements_match_task_keywords() {
        let g = graph(vec![
            element("button_1", "AXButton", "Submit", "TestApp"),
            element("text_1", "AXTextField", "Name Field", "TestApp"),
        ]);
        let relevant: Value = serde_json::from_str(&relevant_elements(&g, "submit the form")).unwrap();
        let ids: Vec<&str> = relevant
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["button_1"]);
        assert_eq!(relevant[0]["role"], "AXButton");
        assert_eq!(relevant[0]["enabled"], true);
    }

    #[test]
    fn short_words_are_not_keywords() {
        let g = graph(vec![element("b", "AXButton", "Go to it", "TestApp")]);
        assert_eq!(relevant_elements(&g, "go to it"), "[]");
    }

    #[test]
    fn keyword_length_counts_characters() {
        let g = graph(vec![element("o", "AXButton", "Öffnen ja", "Finder")]);
        assert_eq!(relevant_elements(&g, "öf"), "[]");
        assert!(relevant_elements(&g, "öff").contains("\"id\": \"o\""));
    }

    #[test]
    fn relevant_elements_search_values() {
        let mut field = element("text_1", "AXTextField", "", "TestApp");
        field.value = Some(json!("hello@example.com"));
        let g = graph(vec![field]);
        assert!(relevant_elements(&g, "replace EXAMPLE.COM address").contains("text_1"));
    }

    #[test]
    fn summary_counts_roles_and_lists_notable_controls() {
        let mut untitled = element("b2", "AXButton", "", "TestApp");
        untitled.title = Some("Cancel".into());
        let g = graph(vec![
            element("b1", "AXButton", "Submit", "TestApp"),
            untitled,
            element("s1", "AXStaticText", "Hello", "TestApp"),
        ]);
        let summary = summarize_ui_graph(&g, g.active_application.as_deref());
        assert!(summary.starts_with("Application: TestApp\nTotal elements: 3\n"));
        assert!(summary.contains("Element types: AXButton: 2, AXStaticText: 1"));
        assert!(summary.contains("AXButton 'Submit'"));
        assert!(summary.contains("AXButton 'Cancel'"));
        assert!(!summary.contains("Hello"));
    }

    #[test]
    fn notable_controls_are_capped() {
        let buttons = (0..15)
            .map(|i| element(&format!("b{i:02}"), "AXButton", &format!("Button {i}"), "TestApp"))
            .collect();
        let summary = summarize_ui_graph(&graph(buttons), None);
        assert_eq!(summary.matches("AXButton '").count(), 10);
    }

    #[test]
    fn empty_graph_summary() {
        let summary = summarize_ui_graph(&UiGraph::default(), None);
        assert_eq!(summary, "Application: Unknown\nTotal elements: 0\nElement types: \n");
    }

    #[test]
    fn interactive_elements_grouped_and_sorted() {
        let mut disabled = element("b3", "AXButton", "Disabled", "Mail");
        disabled.is_enabled = false;
        let g = graph(vec![
            element("b2", "AXButton", "Send", "Mail"),
            element("t1", "AXTextField", "Subject", "Mail"),
            element("b1", "AXButton", "Archive", "Mail"),
            element("l1", "AXLink", "Docs", "Safari"),
            element("s1", "AXStaticText", "Inbox", "Mail"),
            disabled,
        ]);
        let listing = interactive_elements_by_app(&g);
        let archive = listing.find("b1: AXButton label:'Archive'").unwrap();
        let send = listing.find("b2: AXButton label:'Send'").unwrap();
        let subject = listing.find("t1: AXTextField label:'Subject'").unwrap();
        assert!(archive < send && send < subject);
        assert!(listing.contains("Safari:\n  - l1: AXLink label:'Docs'"));
        assert!(!listing.contains("Disabled"));
        assert!(!listing.contains("Inbox"));
    }

    #[test]
    fn interactive_elements_capped_per_app() {
        let buttons = (0..25)
            .map(|i| element(&format!("b{i:02}"), "AXButton", &format!("Button {i:02}"), "Finder"))
            .collect();
        let listing = interactive_elements_by_app(&graph(buttons));
        assert_eq!(listing.matches("AXButton label:").count(), 20);
        assert!(listing.ends_with("... and 5 more"));
    }

    #[test]
    fn selection_list_carries_positions() {
        let mut button = element("btn1", "AXButton", "OK", "TestApp");
        button.position = Some(Point { x: 10.0, y: 20.0 });
        let formatted: Value =
            serde_json::from_str(&format_elements_for_selection(&[button])).unwrap();
        assert_eq!(formatted[0]["id"], "btn1");
        assert_eq!(formatted[0]["position"]["x"], 10.0);
    }
}
