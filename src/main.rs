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

use clap::Parser;
use tracing::info;

use flexline::cli::{Cli, Commands};
use flexline::commands::{execute_command, CommandContext};
use flexline::logger;

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let ctx = match CommandContext::load(cli.config.as_deref()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return std::process::ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.clone().unwrap_or_else(|| ctx.settings.logging.log_level.clone());
    // Only inspection runs keep a session log file
    let log_dir = matches!(cli.command, Commands::Run(_)).then(|| ctx.settings.logging.log_dir.clone());
    if let Some(path) = logger::init_logging(&level, log_dir.as_deref()) {
        info!("Logging to {}", path.display());
    }

    match execute_command(ctx, &cli.command) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
