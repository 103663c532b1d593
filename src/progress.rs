// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2023 lacklustr@protonmail.com https://github.com/eadf
// This file is part of the hallr crate.

//! Synchronous progress reporting (§9 "Coroutines and callbacks"). No
//! cancellation token exists anywhere in this crate: a long-running stage
//! is aborted by killing the process, never by a cooperative check.

/// A progress callback invoked from the owning thread only; no thread
/// safety is required or provided. `done` and `total` are both in the same
/// unit the calling stage chose (points, cells, faces, ...).
pub type ProgressFn<'a> = dyn Fn(usize, usize) + 'a;

#[inline]
pub(crate) fn report(progress: Option<&ProgressFn<'_>>, done: usize, total: usize) {
    if let Some(f) = progress {
        f(done, total);
    }
}
