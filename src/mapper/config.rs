// Copyright 2025 Rowmap Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mapper configuration
//!

/// Text parameters up to this length are sent with a fixed size
pub const DEFAULT_STRING_SIZE: i32 = 4000;

/// Configuration options for a mapper instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapperConfig {
    /// Number of cache insertions between maintenance sweeps
    /// Default: 1000
    pub collect_per_items: usize,

    /// Entries whose hit count is at or below this floor are evicted by a sweep
    /// Default: 0
    pub collect_hit_count_min: u64,

    /// Size assigned to text parameters not longer than this value;
    /// longer values are sent unbounded (size -1)
    /// Default: 4000
    pub default_string_size: i32,

    /// Skip parameter members whose placeholder does not appear in the SQL
    /// Default: true
    pub remove_unused_parameters: bool,

    /// Materialize query results eagerly unless a command says otherwise
    /// Default: true
    pub buffered: bool,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            collect_per_items: 1000,
            collect_hit_count_min: 0,
            default_string_size: DEFAULT_STRING_SIZE,
            remove_unused_parameters: true,
            buffered: true,
        }
    }
}

impl MapperConfig {
    /// Creates a new MapperConfig with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sweep interval in insertions
    pub fn with_collect_per_items(mut self, items: usize) -> Self {
        self.collect_per_items = items.max(1);
        self
    }

    /// Sets the eviction hit-count floor
    pub fn with_collect_hit_count_min(mut self, floor: u64) -> Self {
        self.collect_hit_count_min = floor;
        self
    }

    /// Sets the default text parameter size
    pub fn with_default_string_size(mut self, size: i32) -> Self {
        self.default_string_size = size;
        self
    }

    /// Enables or disables placeholder filtering
    pub fn with_remove_unused_parameters(mut self, enabled: bool) -> Self {
        self.remove_unused_parameters = enabled;
        self
    }

    /// Sets the default buffering mode
    pub fn with_buffered(mut self, buffered: bool) -> Self {
        self.buffered = buffered;
        self
    }
}
