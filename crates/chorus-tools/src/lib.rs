// Copyright (c) 2024-2026 Chorus Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Tool layer: user-supplied tool definitions and callables, the named→
//! positional argument mapping, and tool-output post-processing.

mod params;
mod result;
mod tool;

pub use params::{map_arguments, parse_arguments, ArgumentError};
pub use result::{process_tool_result, MAX_RESULT_CHARS};
pub use tool::{find_tool, ParamSpec, Tool, ToolBinding, ToolFunction};
