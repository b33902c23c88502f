//! Per-workflow interactive context.

use std::collections::HashMap;
use uuid::Uuid;

use crate::views::Figure;

/// How many times each step ran for one item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounters {
    pub estimates: usize,
    pub applies: usize,
    pub plots: usize,
}

/// What was plotted last and how much work has been done.
///
/// The session is owned by its workflow; two workflows never share the
/// "last plotted view".
#[derive(Debug, Default)]
pub struct Session {
    last_plotted: Option<(Uuid, String)>,
    last_figure: Option<Figure>,
    counters: HashMap<Uuid, CallCounters>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `(item, view id)` plotted most recently.
    pub fn last_plotted(&self) -> Option<(Uuid, &str)> {
        self.last_plotted
            .as_ref()
            .map(|(item, view)| (*item, view.as_str()))
    }

    pub fn last_figure(&self) -> Option<&Figure> {
        self.last_figure.as_ref()
    }

    pub fn counters(&self, item: Uuid) -> CallCounters {
        self.counters.get(&item).copied().unwrap_or_default()
    }

    /// Total counts over every item.
    pub fn totals(&self) -> CallCounters {
        self.counters
            .values()
            .fold(CallCounters::default(), |acc, c| CallCounters {
                estimates: acc.estimates + c.estimates,
                applies: acc.applies + c.applies,
                plots: acc.plots + c.plots,
            })
    }

    pub(crate) fn record_plot(&mut self, item: Uuid, view: &str, figure: Figure) {
        self.last_plotted = Some((item, view.to_string()));
        self.last_figure = Some(figure);
        self.counters.entry(item).or_default().plots += 1;
    }

    pub(crate) fn count_estimate(&mut self, item: Uuid) {
        self.counters.entry(item).or_default().estimates += 1;
    }

    pub(crate) fn count_apply(&mut self, item: Uuid) {
        self.counters.entry(item).or_default().applies += 1;
    }

    /// Forget an item that left the workflow.
    pub(crate) fn forget(&mut self, item: Uuid) {
        if self.last_plotted.as_ref().is_some_and(|(id, _)| *id == item) {
            self.last_plotted = None;
            self.last_figure = None;
        }
        self.counters.remove(&item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_default_to_zero() {
        let session = Session::new();
        assert_eq!(session.counters(Uuid::new_v4()), CallCounters::default());
        assert!(session.last_plotted().is_none());
    }

    #[test]
    fn test_record_and_forget() {
        let mut session = Session::new();
        let item = Uuid::new_v4();
        session.count_apply(item);
        session.count_apply(item);
        session.count_estimate(item);
        session.record_plot(item, "histogram", Figure::new("x", "y"));

        let counters = session.counters(item);
        assert_eq!(counters.applies, 2);
        assert_eq!(counters.estimates, 1);
        assert_eq!(counters.plots, 1);
        assert_eq!(session.last_plotted(), Some((item, "histogram")));
        assert_eq!(session.totals().applies, 2);

        session.forget(item);
        assert!(session.last_plotted().is_none());
        assert!(session.last_figure().is_none());
        assert_eq!(session.counters(item), CallCounters::default());
    }
}
