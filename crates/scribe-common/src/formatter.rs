use crate::protocol::{ActionKind, Step};

/// Default sensitive field names that should be masked in recorded values.
const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "cvv",
    "ssn",
    "card_number",
    "credit_card",
];

pub const MASK: &str = "••••••••";

/// One line per step, ordered by sequence regardless of input order.
pub fn format_steps(steps: &[Step]) -> String {
    let mut ordered: Vec<&Step> = steps.iter().collect();
    ordered.sort_by_key(|s| s.sequence);

    let mut output = String::new();
    for step in ordered {
        output.push_str(&format_step(step));
        output.push('\n');
    }
    output
}

/// e.g. `#3 click button "Sign in" (#submit) @ https://x/login [shot]`
pub fn format_step(step: &Step) -> String {
    let mut line = format!("#{} {}", step.sequence, step.action);

    if let Some(el) = &step.payload.element {
        let name = el
            .label
            .as_deref()
            .or(el.text.as_deref())
            .unwrap_or_default();
        if name.is_empty() {
            line.push_str(&format!(" {} ({})", el.tag_name, el.selector));
        } else {
            line.push_str(&format!(" {} {:?} ({})", el.tag_name, name, el.selector));
        }
    }

    if let Some(value) = &step.payload.value {
        line.push_str(&format!(" = {:?}", value.to_string()));
    }

    match step.action {
        ActionKind::Navigation | ActionKind::PageLoad => {
            line.push_str(&format!(" -> {} \"{}\"", step.page_url, step.page_title))
        }
        _ => line.push_str(&format!(" @ {}", step.page_url)),
    }

    if step.screenshot.is_some() {
        line.push_str(" [shot]");
    }
    line
}

pub fn mask_sensitive(value: &str, field_name: &str, sensitive_fields: &[String]) -> String {
    if is_sensitive_field(field_name, sensitive_fields) {
        MASK.to_string()
    } else {
        value.to_string()
    }
}

pub fn is_sensitive_field(field_name: &str, sensitive_fields: &[String]) -> bool {
    let lower_field = field_name.to_lowercase();

    sensitive_fields
        .iter()
        .any(|f| lower_field.contains(&f.to_lowercase()))
        || DEFAULT_SENSITIVE_FIELDS
            .iter()
            .any(|f| lower_field.contains(*f))
}
