// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod optional_u32;
mod vec;

pub(crate) use optional_u32::OptionalU32;
pub use vec::FixedVec;
