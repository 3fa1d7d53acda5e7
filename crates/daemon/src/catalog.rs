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

use std::path::Path;

use eyre::{Error, WrapErr};
use tracing::info;

use aln_common::TokenCatalog;

/// Load the token catalog from a JSON file: an array of token definitions.
/// The catalog is immutable for the life of the process.
pub fn load_catalog(path: &Path) -> Result<TokenCatalog, Error> {
    let raw = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Unable to read token catalog at {path:?}"))?;
    let catalog = TokenCatalog::from_json(&raw)
        .wrap_err_with(|| format!("Unable to parse token catalog at {path:?}"))?;
    info!(tokens = catalog.len(), ?path, "Loaded token catalog");
    Ok(catalog)
}
