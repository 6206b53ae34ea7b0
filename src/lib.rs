/*
 * This file is part of Flexline.
 *
 * Copyright (C) 2025 Flexline contributors
 *
 * Flexline is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Flexline is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Flexline. If not, see <https://www.gnu.org/licenses/>.
 */

//! Flexline - camera inspection for board and nail defects
//!
//! The binary's command-line surface and the tokio runtime that drives a
//! [`fl_core::Station`]. The pipeline itself lives in `fl-core`.

pub mod cli;
pub mod commands;
pub mod logger;
pub mod runtime;
