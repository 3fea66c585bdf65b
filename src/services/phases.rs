use crate::error::{JobError, Result};
use crate::services::poller::PollEvent;
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationPhase {
    Confirm,
    Progress,
    Result,
    /// Left without reaching a result: cancelled at confirm, or a fatal job failure.
    Closed,
}

/// confirm -> progress -> result. Leaving `Progress` is driven only by the
/// poll loop reporting completion, never by percent.
#[derive(Debug)]
pub struct RemediationFlow {
    phase: RemediationPhase,
    job_id: Option<String>,
    fatal: Option<String>,
}

impl Default for RemediationFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl RemediationFlow {
    pub fn new() -> Self {
        Self {
            phase: RemediationPhase::Confirm,
            job_id: None,
            fatal: None,
        }
    }

    pub fn phase(&self) -> RemediationPhase {
        self.phase
    }

    pub fn job_id(&self) -> Option<&str> {
        self.job_id.as_deref()
    }

    pub fn fatal_message(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    fn invalid(&self, action: &'static str) -> JobError {
        JobError::InvalidTransition {
            phase: format!("{:?}", self.phase),
            action,
        }
    }

    pub fn submitted(&mut self, job_id: &str) -> Result<()> {
        if self.phase != RemediationPhase::Confirm {
            return Err(self.invalid("submit"));
        }
        self.job_id = Some(job_id.to_string());
        self.phase = RemediationPhase::Progress;
        Ok(())
    }

    /// Abort from confirm; no job exists yet.
    pub fn cancel(&mut self) -> Result<()> {
        if self.phase != RemediationPhase::Confirm {
            return Err(self.invalid("cancel"));
        }
        self.phase = RemediationPhase::Closed;
        Ok(())
    }

    pub fn on_event(&mut self, event: &PollEvent) -> Result<()> {
        if self.phase != RemediationPhase::Progress {
            return Err(self.invalid("apply poll event"));
        }
        match event {
            PollEvent::Progress { .. } => {}
            PollEvent::Completed(_) => self.phase = RemediationPhase::Result,
            PollEvent::Failed(e) => {
                self.fatal = Some(e.user_message());
                self.phase = RemediationPhase::Closed;
            }
        }
        debug!("Remediation flow now in {:?}", self.phase);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ScanPage {
    Progress = 1,
    Overview = 2,
    Hotspot = 3,
    Risk = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPhase {
    Page(ScanPage),
    /// "next" pressed on the last page.
    Finished,
    Closed,
}

/// Progress page, then three result pages stepped through by hand.
#[derive(Debug)]
pub struct ScanFlow {
    phase: ScanPhase,
    fatal: Option<String>,
}

impl Default for ScanFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanFlow {
    pub fn new() -> Self {
        Self {
            phase: ScanPhase::Page(ScanPage::Progress),
            fatal: None,
        }
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn page(&self) -> Option<ScanPage> {
        match self.phase {
            ScanPhase::Page(page) => Some(page),
            _ => None,
        }
    }

    pub fn fatal_message(&self) -> Option<&str> {
        self.fatal.as_deref()
    }

    fn invalid(&self, action: &'static str) -> JobError {
        JobError::InvalidTransition {
            phase: format!("{:?}", self.phase),
            action,
        }
    }

    pub fn on_event(&mut self, event: &PollEvent) -> Result<()> {
        if self.phase != ScanPhase::Page(ScanPage::Progress) {
            return Err(self.invalid("apply poll event"));
        }
        match event {
            PollEvent::Progress { .. } => {}
            PollEvent::Completed(_) => self.phase = ScanPhase::Page(ScanPage::Overview),
            PollEvent::Failed(e) => {
                self.fatal = Some(e.user_message());
                self.phase = ScanPhase::Closed;
            }
        }
        Ok(())
    }

    pub fn next(&mut self) -> Result<()> {
        self.phase = match self.phase {
            ScanPhase::Page(ScanPage::Overview) => ScanPhase::Page(ScanPage::Hotspot),
            ScanPhase::Page(ScanPage::Hotspot) => ScanPhase::Page(ScanPage::Risk),
            ScanPhase::Page(ScanPage::Risk) => ScanPhase::Finished,
            _ => return Err(self.invalid("advance")),
        };
        Ok(())
    }
}
