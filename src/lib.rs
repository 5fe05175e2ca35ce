/*
 * This file is part of QiTech Control.
 *
 * Copyright (C) 2025 QiTech Control contributors
 *
 * QiTech Control is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * QiTech Control is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with QiTech Control. If not, see <https://www.gnu.org/licenses/>.
 */

//! `qcctl` library surface: argument parsing, logging setup and offline replay

pub mod cli;
pub mod logger;
pub mod replay;
