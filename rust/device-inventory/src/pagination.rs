/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Limit handling for capped listings.

use serde::Serialize;

/// Default and ceiling for fact-table listings.
pub const FACT_LIMITS: LimitPolicy = LimitPolicy {
    default: 200,
    max: 500,
};

/// Default and ceiling for topology listings.
pub const TOPOLOGY_LIMITS: LimitPolicy = LimitPolicy {
    default: 300,
    max: 1000,
};

#[derive(Debug, Clone, Copy)]
pub struct LimitPolicy {
    pub default: usize,
    pub max: usize,
}

impl LimitPolicy {
    /// Zero or out-of-range requests fall back to the default rather than
    /// being clamped.
    pub fn normalize(&self, requested: usize) -> usize {
        if requested == 0 || requested > self.max {
            self.default
        } else {
            requested
        }
    }
}

/// A capped listing. `truncated` is set when more rows matched than were
/// returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub truncated: bool,
    pub limit: usize,
}

impl<T: Clone> Page<T> {
    /// Collects matching rows in iteration order up to `limit`, counting all
    /// matches to derive `truncated`.
    pub fn collect<'a, I, F>(rows: I, limit: usize, mut matches: F) -> Self
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
        F: FnMut(&T) -> bool,
    {
        let mut items = Vec::new();
        let mut total = 0usize;
        for row in rows {
            if !matches(row) {
                continue;
            }
            total += 1;
            if items.len() < limit {
                items.push(row.clone());
            }
        }
        Self {
            truncated: total > items.len(),
            items,
            limit,
        }
    }
}
