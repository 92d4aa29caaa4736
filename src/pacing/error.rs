/*
 *  Copyright (c) 2019 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use thiserror::Error;

use crate::api::units::DataRate;

/// Requests rejected by the pacer or its prober.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PacingError {
    /// Packets can't be paced before a pacing bitrate is configured.
    #[error("pacing bitrate must be set before enqueueing packets")]
    PacingRateNotSet,

    /// Probing is switched off.
    #[error("bitrate probing is disabled")]
    ProberDisabled,

    /// A probe cluster needs a positive target bitrate.
    #[error("invalid probe bitrate: {0:?}")]
    InvalidProbeBitrate(DataRate),
}
