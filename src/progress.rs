/// Receives one line per pipeline milestone ("Threshold: ...", "Adjoining pixels: N sets").
///
/// Batch callers pass a sink to each `run` call; the line is also logged through
/// `tracing` by the component itself, so a sink is only needed when the caller wants
/// the text.
pub trait Progress {
    fn milestone(&mut self, message: &str);
}

/// Discards every milestone.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn milestone(&mut self, _message: &str) {}
}

/// Forwards milestones to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl Progress for LogProgress {
    fn milestone(&mut self, message: &str) {
        tracing::info!(target: "starsift::progress", "{}", message);
    }
}

impl Progress for Vec<String> {
    fn milestone(&mut self, message: &str) {
        self.push(message.to_string());
    }
}

/// Adapts a closure into a progress sink.
pub struct FnProgress<F: FnMut(&str)>(pub F);

impl<F: FnMut(&str)> Progress for FnProgress<F> {
    fn milestone(&mut self, message: &str) {
        (self.0)(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_collects_lines() {
        let mut lines: Vec<String> = Vec::new();
        lines.milestone("Threshold: 12.0");
        lines.milestone("Adjoining pixels: 3 sets");
        assert_eq!(lines, vec!["Threshold: 12.0", "Adjoining pixels: 3 sets"]);
    }

    #[test]
    fn test_closure_sink() {
        let mut count = 0;
        {
            let mut sink = FnProgress(|_: &str| count += 1);
            sink.milestone("a");
            sink.milestone("b");
        }
        assert_eq!(count, 2);
    }
}
