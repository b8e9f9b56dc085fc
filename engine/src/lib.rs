// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory management building blocks of the engine: a linear allocator for
//! backing memory, fixed-capacity collections on top of it, and the page-span
//! allocator used to hand out pages of GPU-side resource pools.

#![no_std]

pub mod allocators;
pub mod collections;
pub mod page_allocator;

#[cfg(test)]
mod test_platform;
