// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk: Scan orchestration.
//
// `ScanController` is the front door: it validates a request, picks a bridge,
// and streams finished pages back while capture continues.

pub mod controller;
pub mod dispatch;
pub mod postprocess;
pub mod validate;

pub use controller::{ScanController, ScanEvent};
pub use dispatch::{BridgeFactory, BridgeStrategy};
pub use postprocess::{PageOutcome, PostProcessor};
pub use validate::ScanOptionsValidator;
