use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Span;

/// How a raw status string is drawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusBadge {
    pub color: Color,
    pub icon: &'static str,
    pub label: String,
}

impl StatusBadge {
    fn neutral(raw: &str) -> Self {
        let label = if raw.trim().is_empty() {
            "UNKNOWN".to_string()
        } else {
            raw.trim().to_uppercase()
        };
        Self {
            color: Color::Gray,
            icon: "•",
            label,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.color == Color::Gray && self.icon == "•"
    }

    pub fn span(&self) -> Span<'static> {
        Span::styled(
            format!("{} {}", self.icon, self.label),
            Style::default().fg(self.color).add_modifier(Modifier::BOLD),
        )
    }
}

pub fn build_badge(raw: &str) -> StatusBadge {
    let (color, icon) = match raw {
        "pending" => (Color::LightBlue, "⏳"),
        "building" => (Color::Yellow, "⚙"),
        "success" => (Color::Green, "✔"),
        "failed" => (Color::Red, "✘"),
        _ => return StatusBadge::neutral(raw),
    };
    StatusBadge {
        color,
        icon,
        label: raw.to_uppercase(),
    }
}

pub fn agent_badge(raw: &str) -> StatusBadge {
    let (color, icon) = match raw {
        "ONLINE" => (Color::Green, "●"),
        "OFFLINE" => (Color::DarkGray, "○"),
        "DRAINING" => (Color::Yellow, "◐"),
        _ => return StatusBadge::neutral(raw),
    };
    StatusBadge {
        color,
        icon,
        label: raw.to_string(),
    }
}
