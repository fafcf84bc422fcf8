use super::{Identified, Proxy, TestOutcome};

/// One proxy with its outcomes for a run, in probe order
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBundle {
    pub proxy: Proxy,
    pub outcomes: Vec<TestOutcome>,
}

impl ResultBundle {
    pub fn new(proxy: Proxy, outcomes: Vec<TestOutcome>) -> Self {
        Self { proxy, outcomes }
    }
}

impl Identified for ResultBundle {
    fn identity(&self) -> String {
        self.proxy.identity()
    }
}
