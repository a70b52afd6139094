//! Redaction-aware model of the configuration form.
//!
//! The panel never shows stored secrets; it shows a redacted placeholder and
//! must decide at save time, per field, whether to submit a new value, submit
//! an explicit clear, or omit the field entirely. That decision lives here as
//! plain data and pure functions so both the HTTP layer and the embedded page
//! share one contract.

use std::collections::{HashMap, HashSet};

pub const DISCORD_TOKEN: &str = "DISCORD_TOKEN";
pub const JELLYFIN_URL: &str = "JELLYFIN_URL";
pub const JELLYFIN_API_KEY: &str = "JELLYFIN_API_KEY";

/// Marker between the prefix and the asterisk run in a redacted placeholder.
pub const ELLIPSIS: char = '\u{2026}';

const REDACTED_PREFIX_MAX: usize = 10;

/// One tracked form field. The set is fixed by the panel markup and never
/// changes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub secret: bool,
}

/// Tracked fields in submission order.
pub const TRACKED_FIELDS: [FieldSpec; 3] = [
    FieldSpec { key: DISCORD_TOKEN, secret: true },
    FieldSpec { key: JELLYFIN_URL, secret: false },
    FieldSpec { key: JELLYFIN_API_KEY, secret: true },
];

pub fn is_secret_key(key: &str) -> bool {
    TRACKED_FIELDS.iter().any(|f| f.secret && f.key == key)
}

/// Returns true when `value` looks like a server-issued redacted placeholder:
/// a run of one or more asterisks, or a 1..=10 character prefix followed by
/// an ellipsis and one or more asterisks. Empty strings and plain text are
/// rejected so a genuinely empty field is never mistaken for a placeholder.
pub fn is_redacted_format(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.chars().all(|c| c == '*') {
        return true;
    }
    match value.split_once(ELLIPSIS) {
        Some((prefix, stars)) => {
            let prefix_len = prefix.chars().count();
            (1..=REDACTED_PREFIX_MAX).contains(&prefix_len)
                && !stars.is_empty()
                && stars.chars().all(|c| c == '*')
        }
        None => false,
    }
}

/// Placeholder shown in place of a stored secret. Empty secrets stay empty so
/// the form can tell "unset" apart from "set but hidden". Short secrets are
/// fully masked; longer ones keep a two-character prefix as a hint of which
/// credential is stored.
pub fn redacted_display(secret: &str) -> String {
    let len = secret.chars().count();
    if len == 0 {
        return String::new();
    }
    if len < 8 {
        return "*".repeat(len.max(4));
    }
    let prefix: String = secret.chars().take(2).collect();
    format!("{}{}{}", prefix, ELLIPSIS, "*".repeat(4))
}

/// Runtime state of the config form: current display values, the snapshot of
/// redacted placeholders taken at load, and explicit clear requests.
///
/// The snapshot is written once by [`FormState::load`] and only read
/// afterwards; a full reload is the only way to take a new one.
#[derive(Debug, Default, Clone)]
pub struct FormState {
    values: HashMap<String, String>,
    snapshot: HashMap<String, String>,
    cleared: HashSet<String>,
}

impl FormState {
    /// Populates the form from a loaded configuration map. For secret fields
    /// the loaded value is recorded into the snapshot only when it matches
    /// the redacted pattern; an empty or plain value means the server holds
    /// no secret for that key.
    pub fn load(values: &HashMap<String, String>) -> Self {
        let mut state = Self::default();
        for field in TRACKED_FIELDS {
            let value = values.get(field.key).cloned().unwrap_or_default();
            if field.secret && is_redacted_format(&value) {
                state.snapshot.insert(field.key.to_string(), value.clone());
            }
            state.values.insert(field.key.to_string(), value);
        }
        state
    }

    pub fn value(&self, key: &str) -> &str {
        self.values.get(key).map(String::as_str).unwrap_or("")
    }

    pub fn set_value(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Records an explicit clear request for a secret field and empties its
    /// display value. Idempotent; ignored for non-secret keys.
    pub fn mark_cleared(&mut self, key: &str) {
        if !is_secret_key(key) {
            return;
        }
        self.cleared.insert(key.to_string());
        self.values.insert(key.to_string(), String::new());
    }

    pub fn is_cleared(&self, key: &str) -> bool {
        self.cleared.contains(key)
    }

    pub fn snapshot_value(&self, key: &str) -> Option<&str> {
        self.snapshot.get(key).map(String::as_str)
    }
}

/// Computes the ordered field list to submit on save.
///
/// Plain fields are always sent as-is. Cleared secrets are sent as `""`, an
/// explicit instruction to erase the stored value. A secret whose display
/// value still exactly equals its load-time snapshot is omitted entirely, so
/// an untouched placeholder never overwrites the real secret it stands for.
/// Any other secret value, including one for which no snapshot was ever
/// recorded, is sent verbatim.
pub fn compute_submission(state: &FormState) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(TRACKED_FIELDS.len());
    for field in TRACKED_FIELDS {
        let current = state.value(field.key);
        if !field.secret {
            out.push((field.key.to_string(), current.to_string()));
            continue;
        }
        if state.is_cleared(field.key) {
            out.push((field.key.to_string(), String::new()));
            continue;
        }
        match state.snapshot_value(field.key) {
            Some(snap) if !current.is_empty() && current == snap => {
                // Untouched placeholder; nothing to send.
            }
            _ => out.push((field.key.to_string(), current.to_string())),
        }
    }
    out
}

pub mod tabs {
    //! Fragment-to-panel resolution for the tabbed panel layout.
    //!
    //! The browser adapter shows exactly the resolved panel and hides the
    //! rest; this module only decides which one that is.

    pub const PANELS: [&str; 3] = ["general", "notify", "jellyfin"];
    pub const DEFAULT_PANEL: &str = "general";

    /// Resolves a URL fragment (with or without the leading `#`) to a known
    /// panel id, falling back to the default for unknown or empty fragments.
    pub fn resolve_panel(fragment: &str) -> &'static str {
        let id = fragment.strip_prefix('#').unwrap_or(fragment);
        PANELS
            .iter()
            .copied()
            .find(|p| *p == id)
            .unwrap_or(DEFAULT_PANEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(values: &[(&str, &str)]) -> FormState {
        let map: HashMap<String, String> = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        FormState::load(&map)
    }

    fn submission_value(pairs: &[(String, String)], key: &str) -> Option<String> {
        pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    #[test]
    fn redacted_format_accepts_asterisk_runs() {
        assert!(is_redacted_format("*"));
        assert!(is_redacted_format("********"));
    }

    #[test]
    fn redacted_format_accepts_prefixed_placeholders() {
        assert!(is_redacted_format("ab…***"));
        assert!(is_redacted_format("0123456789…*"));
    }

    #[test]
    fn redacted_format_rejects_empty_and_plain_text() {
        assert!(!is_redacted_format(""));
        assert!(!is_redacted_format("hunter2"));
        assert!(!is_redacted_format("ab…"));
        assert!(!is_redacted_format("…***"));
        assert!(!is_redacted_format("01234567890…*"));
        assert!(!is_redacted_format("ab…**x"));
    }

    #[test]
    fn redacted_display_round_trips_through_detection() {
        assert_eq!(redacted_display(""), "");
        for secret in ["x", "abc", "token123", "averylongdiscordtoken"] {
            let display = redacted_display(secret);
            assert!(
                is_redacted_format(&display),
                "{display:?} should match the redacted pattern"
            );
        }
        assert!(redacted_display("averylongdiscordtoken").starts_with("av…"));
    }

    #[test]
    fn load_records_snapshot_only_for_redacted_secrets() {
        let state = loaded(&[
            (DISCORD_TOKEN, "ab…***"),
            (JELLYFIN_URL, "http://x"),
            (JELLYFIN_API_KEY, ""),
        ]);
        assert_eq!(state.snapshot_value(DISCORD_TOKEN), Some("ab…***"));
        assert_eq!(state.snapshot_value(JELLYFIN_API_KEY), None);
        assert_eq!(state.snapshot_value(JELLYFIN_URL), None);
    }

    #[test]
    fn untouched_snapshot_secret_is_omitted() {
        let state = loaded(&[(DISCORD_TOKEN, "ab…***"), (JELLYFIN_URL, "http://x")]);
        let pairs = compute_submission(&state);
        assert_eq!(submission_value(&pairs, DISCORD_TOKEN), None);
    }

    #[test]
    fn cleared_secret_submits_empty_regardless_of_snapshot() {
        let mut state = loaded(&[(DISCORD_TOKEN, "ab…***")]);
        state.mark_cleared(DISCORD_TOKEN);
        state.mark_cleared(DISCORD_TOKEN); // idempotent
        assert_eq!(state.value(DISCORD_TOKEN), "");
        let pairs = compute_submission(&state);
        assert_eq!(submission_value(&pairs, DISCORD_TOKEN), Some(String::new()));
    }

    #[test]
    fn edited_secret_submits_current_value() {
        let mut state = loaded(&[(DISCORD_TOKEN, "ab…***")]);
        state.set_value(DISCORD_TOKEN, "new-token");
        let pairs = compute_submission(&state);
        assert_eq!(
            submission_value(&pairs, DISCORD_TOKEN),
            Some("new-token".to_string())
        );
    }

    #[test]
    fn secret_without_snapshot_submits_current_value() {
        let mut state = loaded(&[(JELLYFIN_API_KEY, "")]);
        state.set_value(JELLYFIN_API_KEY, "key123");
        let pairs = compute_submission(&state);
        assert_eq!(
            submission_value(&pairs, JELLYFIN_API_KEY),
            Some("key123".to_string())
        );
    }

    #[test]
    fn plain_fields_are_always_included() {
        let state = loaded(&[(JELLYFIN_URL, "")]);
        let pairs = compute_submission(&state);
        assert_eq!(submission_value(&pairs, JELLYFIN_URL), Some(String::new()));
    }

    #[test]
    fn mark_cleared_ignores_plain_fields() {
        let mut state = loaded(&[(JELLYFIN_URL, "http://x")]);
        state.mark_cleared(JELLYFIN_URL);
        assert!(!state.is_cleared(JELLYFIN_URL));
        assert_eq!(state.value(JELLYFIN_URL), "http://x");
    }

    #[test]
    fn submission_preserves_tracked_field_order() {
        let mut state = loaded(&[
            (DISCORD_TOKEN, "tok"),
            (JELLYFIN_URL, "http://x"),
            (JELLYFIN_API_KEY, "key"),
        ]);
        state.set_value(DISCORD_TOKEN, "tok2");
        let keys: Vec<String> = compute_submission(&state)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![DISCORD_TOKEN, JELLYFIN_URL, JELLYFIN_API_KEY]);
    }

    // Scenario from the panel: load returns a redacted token, a URL, and an
    // empty API key; the user saves without touching anything.
    #[test]
    fn untouched_save_sends_url_and_empty_api_key_only() {
        let state = loaded(&[
            (DISCORD_TOKEN, "ab…***"),
            (JELLYFIN_URL, "http://x"),
            (JELLYFIN_API_KEY, ""),
        ]);
        let pairs = compute_submission(&state);
        assert_eq!(submission_value(&pairs, DISCORD_TOKEN), None);
        assert_eq!(
            submission_value(&pairs, JELLYFIN_URL),
            Some("http://x".to_string())
        );
        // No snapshot was recorded for the empty key, so the empty value is
        // sent and lands as a wire-level clear. Inherited behavior.
        assert_eq!(
            submission_value(&pairs, JELLYFIN_API_KEY),
            Some(String::new())
        );
    }

    #[test]
    fn tabs_resolve_known_fragment() {
        assert_eq!(tabs::resolve_panel("#notify"), "notify");
        assert_eq!(tabs::resolve_panel("jellyfin"), "jellyfin");
    }

    #[test]
    fn tabs_fall_back_to_default() {
        assert_eq!(tabs::resolve_panel(""), "general");
        assert_eq!(tabs::resolve_panel("#"), "general");
        assert_eq!(tabs::resolve_panel("#unknown"), "general");
    }
}
