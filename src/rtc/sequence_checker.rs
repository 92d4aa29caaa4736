/*
 *  Copyright (c) 2019 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

#[cfg(debug_assertions)]
use std::{
    cell::Cell,
    thread::{self, ThreadId},
};

/// Checks that the methods of a component are always called from the same
/// thread. The first call binds the checker unless it was attached on
/// construction. Compiles to nothing in release builds.
#[derive(Debug, Clone, Default)]
pub struct SequenceChecker {
    #[cfg(debug_assertions)]
    bound_thread: Cell<Option<ThreadId>>,
}

impl SequenceChecker {
    /// A checker that binds to whichever thread calls it first.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A checker bound to the current thread.
    pub fn attached() -> Self {
        let checker = Self::default();
        #[cfg(debug_assertions)]
        checker.bound_thread.set(Some(thread::current().id()));
        checker
    }

    pub fn is_current(&self) -> bool {
        #[cfg(debug_assertions)]
        {
            let current = thread::current().id();
            match self.bound_thread.get() {
                Some(bound) => bound == current,
                None => {
                    self.bound_thread.set(Some(current));
                    true
                }
            }
        }
        #[cfg(not(debug_assertions))]
        {
            true
        }
    }

    /// Forgets the bound thread, e.g. after the owner moved to another thread.
    pub fn detach(&self) {
        #[cfg(debug_assertions)]
        self.bound_thread.set(None);
    }

    #[track_caller]
    pub fn check(&self) {
        debug_assert!(self.is_current(), "called from the wrong thread");
    }
}
