// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Plain-language error messages for people standing in front of a scanner.
//
// Every technical error is mapped to a short message and a suggestion. The
// severity drives how the host application presents it.

use crate::error::{DeviceErrorKind, ScanError};

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Busy device, dropped connection: worth retrying.
    Transient,
    /// The user must do something (load paper, switch on, pick another device).
    ActionRequired,
    /// Retrying will not help with the current settings.
    Permanent,
}

/// A human-readable error with a message and an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    pub retriable: bool,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: &str, retriable: bool, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            retriable,
            severity,
        }
    }
}

/// Convert a `ScanError` into something that can be shown to the user.
pub fn humanize_error(err: &ScanError) -> HumanError {
    match err {
        // -- Device errors --
        ScanError::Device { kind, .. } => humanize_device_error(*kind),

        ScanError::NoFeederSupport => HumanError::new(
            "This scanner doesn't have a document feeder.",
            "Choose the flatbed as the paper source, or pick a different scanner.",
            false,
            Severity::ActionRequired,
        ),

        ScanError::NoDuplexSupport => HumanError::new(
            "This scanner can't scan both sides of a page.",
            "Choose single-sided scanning, or pick a scanner that supports duplex.",
            false,
            Severity::ActionRequired,
        ),

        ScanError::Transfer(_) => HumanError::new(
            "A page didn't come through from the scanner.",
            "Check the cable or network connection and scan that page again.",
            true,
            Severity::Transient,
        ),

        // Detail is logged where the error is raised; users get the generic text.
        ScanError::UnknownDriver(_) => HumanError::new(
            "The scanner reported an unexpected problem.",
            "Try switching the scanner off and on again. If it keeps happening, check the scanner's driver is installed.",
            true,
            Severity::Transient,
        ),

        // -- Request errors --
        ScanError::InvalidOptions(detail) => HumanError {
            message: "Some scan settings aren't valid.".into(),
            suggestion: format!("Check the scan settings and try again. ({detail})"),
            retriable: false,
            severity: Severity::ActionRequired,
        },

        // -- Image errors --
        ScanError::Image(_) => HumanError::new(
            "A scanned page couldn't be processed.",
            "Try scanning the page again. Turning off auto-deskew may help with unusual pages.",
            true,
            Severity::Transient,
        ),

        ScanError::AlreadyDisposed => HumanError::new(
            "That page is no longer available.",
            "It may have been deleted. Refresh the page list and try again.",
            false,
            Severity::Permanent,
        ),

        // -- Bridge / transport --
        ScanError::Protocol(_) | ScanError::Serialization(_) => HumanError::new(
            "The scanning helper sent something unexpected.",
            "Try again. If this keeps happening, reinstalling the app may help.",
            true,
            Severity::Transient,
        ),

        ScanError::PlatformUnavailable => HumanError::new(
            "This kind of scanner driver isn't available on this computer.",
            "Choose a different driver in the scan settings.",
            false,
            Severity::Permanent,
        ),

        ScanError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::PermissionDenied {
                HumanError::new(
                    "The app isn't allowed to write its temporary files.",
                    "Check the permissions on the temporary folder, or choose a different one in Settings.",
                    false,
                    Severity::ActionRequired,
                )
            } else {
                HumanError::new(
                    "There was a problem reading or writing a file.",
                    "Try again. If this keeps happening, your disk may be full.",
                    true,
                    Severity::Transient,
                )
            }
        }
    }
}

fn humanize_device_error(kind: DeviceErrorKind) -> HumanError {
    match kind {
        DeviceErrorKind::Busy => HumanError::new(
            "The scanner is busy.",
            "Wait for the scanner to finish what it's doing, then try again.",
            true,
            Severity::Transient,
        ),
        DeviceErrorKind::Offline => HumanError::new(
            "The scanner isn't responding.",
            "Make sure the scanner is switched on and connected, then try again.",
            true,
            Severity::ActionRequired,
        ),
        DeviceErrorKind::NotFound => HumanError::new(
            "We couldn't find that scanner.",
            "It may have been unplugged. Choose the scanner again from the list.",
            false,
            Severity::ActionRequired,
        ),
        DeviceErrorKind::FeederEmpty => HumanError::new(
            "There's no paper in the feeder.",
            "Load the pages into the document feeder, then try again.",
            false,
            Severity::ActionRequired,
        ),
        DeviceErrorKind::WorkerExited => HumanError::new(
            "The scanning helper stopped unexpectedly.",
            "Try again. If this keeps happening, the scanner's driver may be faulty.",
            true,
            Severity::Transient,
        ),
        DeviceErrorKind::Timeout => HumanError::new(
            "The scanner took too long to respond.",
            "Check the scanner is on and connected, then try again.",
            true,
            Severity::Transient,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_transient() {
        let human = humanize_error(&ScanError::device(DeviceErrorKind::Busy, "in use"));
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.retriable);
    }

    #[test]
    fn empty_feeder_is_action_required() {
        let human = humanize_error(&ScanError::device(DeviceErrorKind::FeederEmpty, ""));
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(!human.retriable);
    }

    #[test]
    fn unknown_driver_hides_detail() {
        let human = humanize_error(&ScanError::UnknownDriver("HRESULT 0x80210015".into()));
        assert!(!human.message.contains("0x8021"));
        assert!(!human.suggestion.contains("0x8021"));
    }

    #[test]
    fn missing_duplex_is_action_required() {
        let human = humanize_error(&ScanError::NoDuplexSupport);
        assert_eq!(human.severity, Severity::ActionRequired);
    }
}
