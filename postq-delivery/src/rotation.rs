use std::collections::VecDeque;

/// Cycles through sending domains, one per delivery cycle
///
/// The rotation advances every cycle whether or not anything was sent for
/// the current domain. With no domains configured there is nothing to
/// rotate and every cycle delivers unfiltered through the default endpoint.
#[derive(Debug, Clone, Default)]
pub struct DomainRotator {
    domains: VecDeque<String>,
}

impl DomainRotator {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            domains: domains.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.domains.is_empty()
    }

    /// The domain this cycle delivers for, `None` for no filter
    #[must_use]
    pub fn current(&self) -> Option<&str> {
        self.domains.front().map(String::as_str)
    }

    /// Move the head of the rotation to the back
    pub fn advance(&mut self) {
        if !self.domains.is_empty() {
            self.domains.rotate_left(1);
        }
    }

    /// Take this cycle's domain and advance for the next one
    pub fn next_domain(&mut self) -> Option<String> {
        let current = self.current().map(ToOwned::to_owned);
        self.advance();
        current
    }
}
