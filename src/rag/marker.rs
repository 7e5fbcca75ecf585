//! The escalation marker is a literal token the model appends when it cannot
//! answer from the supplied context. Detection is an exact, case-sensitive
//! substring match; every occurrence is removed before the answer is shown or
//! stored.

pub const ESCALATION_MARKER: &str = "[ESCALATE]";

/// Returns the user-visible answer and whether the marker was present.
pub fn strip_escalation_marker(generated: &str) -> (String, bool) {
    if !generated.contains(ESCALATION_MARKER) {
        return (generated.trim().to_string(), false);
    }
    let mut text = generated.to_string();
    // One pass can splice a new marker together from the text around it.
    while text.contains(ESCALATION_MARKER) {
        text = text.replace(ESCALATION_MARKER, "");
    }
    (text.trim().to_string(), true)
}
