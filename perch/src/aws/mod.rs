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

//! This module contains the wrapped AWS Lambda control-plane surfaces, one
//! submodule per resource kind. Every mutating operation blocks until the
//! resource has settled, using the waits in [crate::state].

pub mod concurrency;
pub mod event_source_mapping;
pub mod function;
pub mod permission;
