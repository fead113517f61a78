use std::borrow::Cow;
use std::future::Future;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner:.blue} {msg} {elapsed:.dim}";
const TICK: Duration = Duration::from_millis(120);

/// Spinner on stderr while a command waits on remotes to show up.
#[derive(Debug)]
pub(crate) struct Spinner {
    enabled: bool,
}

impl Spinner {
    pub(crate) fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Awaits `operation`, showing `message` and the time waited so far.
    pub(crate) async fn wait_on<T>(
        &self,
        message: impl Into<Cow<'static, str>>,
        operation: impl Future<Output = T>,
    ) -> T {
        if !self.enabled {
            return operation.await;
        }

        let bar = ProgressBar::new_spinner()
            .with_style(style())
            .with_message(message);
        bar.enable_steady_tick(TICK);
        let result = operation.await;
        bar.finish_and_clear();
        result
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("◐◓◑◒●")
}
