// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sources of backing memory for the engine's fixed-capacity data structures.

mod linear_allocator;

pub use linear_allocator::LinearAllocator;
