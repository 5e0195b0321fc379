// Copyright (c) 2020-present, UMD Database Group.
//
// This program is free software: you can use, redistribute, and/or modify
// it under the terms of the GNU Affero General Public License, version 3
// or later ("AGPL"), as published by the Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

#![warn(missing_docs, clippy::needless_borrow)]
// Clippy lints, some should be disabled incrementally
#![allow(clippy::upper_case_acronyms, clippy::type_complexity)]

//! Perch drives AWS Lambda resources through their asynchronous lifecycle.
//! The Lambda control plane acknowledges a create, update, or delete long
//! before the change has taken effect; Perch pairs every such call with a
//! convergence wait that polls the resource until it settles into a stable
//! state, reports a failure, or runs out of time.

pub mod aws;
pub mod config;
pub mod configs;
pub mod error;
pub mod prelude;
pub mod state;
pub mod tests;
