//
// Copyright (c) The Sable Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod attribute;
