use super::{CardState, CardView};

/// Renders a card view into self-contained markup (structure plus styles).
/// Pure function of the view: the markup carries no state of its own, so
/// every transition is just a re-render.
pub fn render_card(view: &CardView) -> String {
    let state_class = match view.state {
        CardState::Idle => "idle",
        CardState::Listening => "listening",
        CardState::Success => "success",
        CardState::Error => "error",
    };
    let disabled_attr = if view.submit_enabled { "" } else { " disabled" };
    let submit_label = if view.submit_enabled {
        "Capture IR code"
    } else {
        "Listening..."
    };

    let mut recent_markup = String::new();
    if !view.recent.available {
        recent_markup.push_str(
            r#"<p class="recent-placeholder">Recent codes unavailable. The connect service did not respond.</p>"#,
        );
    } else if view.recent.codes.is_empty() {
        recent_markup.push_str(r#"<p class="recent-placeholder">No codes captured yet.</p>"#);
    } else {
        recent_markup.push_str("<ul class=\"recent-list\">");
        for code in &view.recent.codes {
            recent_markup.push_str(&format!(
                r#"<li data-code-id="{id}"><span class="code-label">{device}.{action}</span></li>"#,
                id = code.id,
                device = escape_html(&code.device),
                action = escape_html(&code.action),
            ));
        }
        recent_markup.push_str("</ul>");
    }

    format!(
        r#"<div class="hassbeam-card state-{state_class}">
  <style>
    .hassbeam-card {{ font-family: sans-serif; border-radius: 8px; padding: 16px; }}
    .hassbeam-card .fields {{ display: flex; gap: 8px; margin-bottom: 8px; }}
    .hassbeam-card input {{ flex: 1; padding: 6px; }}
    .hassbeam-card .status {{ min-height: 1.2em; margin-top: 8px; }}
    .hassbeam-card.state-listening .status {{ color: #b58900; }}
    .hassbeam-card.state-success .status {{ color: #2e7d32; }}
    .hassbeam-card.state-error .status {{ color: #c62828; }}
    .hassbeam-card .recent-placeholder {{ color: #777; }}
  </style>
  <h2 class="card-title">{title}</h2>
  <div class="fields">
    <input type="text" name="device" placeholder="Device" value="{device}">
    <input type="text" name="action" placeholder="Action" value="{action}">
  </div>
  <div class="controls">
    <button class="submit"{disabled_attr}>{submit_label}</button>
    <button class="clear">Clear</button>
  </div>
  <div class="status">{status}</div>
  <h3 class="recent-title">Recently captured codes</h3>
  {recent_markup}
</div>"#,
        title = escape_html(&view.title),
        device = escape_html(&view.device),
        action = escape_html(&view.action),
        status = escape_html(&view.status),
    )
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{card::CaptureCard, settings::CardConfig};

    #[test]
    fn idle_card_renders_title_and_enabled_submit() {
        let card = CaptureCard::new(CardConfig {
            title: Some("Living Room IR".to_string()),
        });
        let markup = render_card(&card.view());

        assert!(markup.contains("Living Room IR"));
        assert!(markup.contains(r#"<button class="submit">Capture IR code</button>"#));
        assert!(markup.contains("No codes captured yet."));
    }

    #[test]
    fn listening_card_disables_the_submit_control() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("tv", "power");
        card.begin_submit().expect("dispatch");
        let markup = render_card(&card.view());

        assert!(markup.contains(r#"<button class="submit" disabled>Listening...</button>"#));
        assert!(markup.contains("state-listening"));
    }

    #[test]
    fn user_input_is_escaped() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_input("<script>alert(1)</script>", "\"power\"");
        let markup = render_card(&card.view());

        assert!(!markup.contains("<script>alert(1)</script>"));
        assert!(markup.contains("&lt;script&gt;"));
        assert!(markup.contains("&quot;power&quot;"));
    }

    #[test]
    fn unavailable_history_renders_the_placeholder() {
        let mut card = CaptureCard::new(CardConfig::default());
        card.set_recent_unavailable();
        let markup = render_card(&card.view());

        assert!(markup.contains("Recent codes unavailable."));
    }
}
