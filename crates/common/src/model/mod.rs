// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The domain entities of a live game: sessions, transactions, derived team
//! scores, the static token catalog, and the device roster. Everything here is
//! plain data; all mutation policy lives in the daemon's session engine.

pub mod device;
pub mod scores;
pub mod session;
pub mod token;
pub mod transaction;
