//! Build output comes straight from the agent's terminal; strip escape and
//! control sequences before it reaches ours.

const MAX_LINE_CHARS: usize = 4096;

/// Lines kept from the tail of a build log.
pub const MAX_LOG_LINES: usize = 2000;

enum Escape {
    Start,
    Csi,
    Osc,
    OscEsc,
    String,
    StringEsc,
}

/// One display line with escapes removed, tabs expanded to a space and
/// bidi overrides dropped. Long lines are cut at a fixed width.
pub fn clean_line(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LINE_CHARS));
    let mut escape: Option<Escape> = None;
    let mut kept = 0usize;

    for c in input.chars() {
        if let Some(state) = escape.as_ref() {
            escape = match state {
                Escape::Start => match c {
                    '[' => Some(Escape::Csi),
                    ']' => Some(Escape::Osc),
                    'P' | 'X' | '^' | '_' => Some(Escape::String),
                    _ => None,
                },
                Escape::Csi if ('@'..='~').contains(&c) => None,
                Escape::Csi => Some(Escape::Csi),
                Escape::Osc | Escape::OscEsc if c == '\x07' => None,
                Escape::OscEsc if c == '\\' => None,
                Escape::Osc | Escape::OscEsc if c == '\x1b' => Some(Escape::OscEsc),
                Escape::Osc | Escape::OscEsc => Some(Escape::Osc),
                Escape::StringEsc if c == '\\' => None,
                Escape::String | Escape::StringEsc if c == '\x1b' => Some(Escape::StringEsc),
                Escape::String | Escape::StringEsc => Some(Escape::String),
            };
            continue;
        }

        match c {
            '\x1b' => {
                escape = Some(Escape::Start);
                continue;
            }
            '\t' => out.push(' '),
            c if c.is_control() || is_bidi_control(c) => continue,
            c => out.push(c),
        }
        kept += 1;
        if kept >= MAX_LINE_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
    }
    out
}

/// Split a raw build log into cleaned display lines. Carriage-return
/// progress redraws keep only their final state; only the last
/// [`MAX_LOG_LINES`] lines survive.
pub fn log_lines(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = raw
        .lines()
        .map(|line| clean_line(line.rsplit('\r').find(|s| !s.is_empty()).unwrap_or("")))
        .collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if lines.len() > MAX_LOG_LINES {
        let cut = lines.len() - MAX_LOG_LINES;
        lines.drain(..cut);
    }
    lines
}

fn is_bidi_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}
