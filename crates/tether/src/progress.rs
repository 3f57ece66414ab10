use std::{collections::HashMap, sync::Mutex};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use libtether::task::ProgressSink;

/// A rendered progress node: its bar and the label used when a detail line
/// is cleared.
struct Rendered {
    /// The indicatif bar backing the node.
    bar: ProgressBar,
    /// Label the node was begun with.
    label: String,
}

/// Progress sink rendering the task tree with indicatif bars.
///
/// Subtask nodes render as transient spinners under the root bar; messages
/// print above the bars so they survive redraws.
pub struct TermSink {
    /// Shared multi-bar renderer.
    multi: MultiProgress,
    /// Live bars by node id.
    bars: Mutex<HashMap<u64, Rendered>>,
}

impl TermSink {
    /// Create a sink rendering to stderr via indicatif's defaults.
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TermSink {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::let_underscore_must_use)]
impl ProgressSink for TermSink {
    fn begun(&self, id: u64, _parent: Option<u64>, label: &str, total: Option<u64>) {
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                bar.set_style(ProgressStyle::default_bar());
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(ProgressStyle::default_spinner());
                bar
            }
        };
        bar.set_message(label.to_string());
        let bar = self.multi.add(bar);
        self.bars.lock().unwrap().insert(
            id,
            Rendered {
                bar,
                label: label.to_string(),
            },
        );
    }

    fn total_changed(&self, id: u64, total: u64) {
        if let Some(rendered) = self.bars.lock().unwrap().get(&id) {
            rendered.bar.set_length(total);
        }
    }

    fn advanced(&self, id: u64, units: u64) {
        if let Some(rendered) = self.bars.lock().unwrap().get(&id) {
            rendered.bar.inc(units);
        }
    }

    fn detail_changed(&self, id: u64, detail: Option<&str>) {
        if let Some(rendered) = self.bars.lock().unwrap().get(&id) {
            match detail {
                Some(detail) => rendered
                    .bar
                    .set_message(format!("{}: {detail}", rendered.label)),
                None => rendered.bar.set_message(rendered.label.clone()),
            }
        }
    }

    fn ended(&self, id: u64) {
        if let Some(rendered) = self.bars.lock().unwrap().remove(&id) {
            rendered.bar.finish_and_clear();
            self.multi.remove(&rendered.bar);
        }
    }

    fn message(&self, msg: &str) {
        let _ = self.multi.println(msg);
    }

    fn warning(&self, msg: &str) {
        let _ = self.multi.println(format!("warning: {msg}"));
    }
}
