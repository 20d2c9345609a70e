use std::collections::VecDeque;

use sniffer_core::model::{HttpMessageRecord, PipelineStats};

use crate::PipelineCounters;

/// How many recently emitted messages the dashboard keeps on screen.
const HISTORY_LEN: usize = 500;

pub struct App {
    pub messages: VecDeque<HttpMessageRecord>,
    pub selected_index: usize,
    pub total_messages: u64,
    pub errors: u64,
    pub stats: PipelineStats,
    pub interface: String,
    pub ports: Vec<u16>,
    pub should_quit: bool,
}

impl App {
    pub fn new(interface: &str, ports: &[u16]) -> Self {
        Self {
            messages: VecDeque::with_capacity(HISTORY_LEN),
            selected_index: 0,
            total_messages: 0,
            errors: 0,
            stats: PipelineStats::default(),
            interface: interface.to_string(),
            ports: ports.to_vec(),
            should_quit: false,
        }
    }

    pub fn push_message(&mut self, record: HttpMessageRecord) {
        if self.messages.len() == HISTORY_LEN {
            self.messages.pop_front();
        }
        self.messages.push_back(record);
        self.total_messages += 1;
        if self.selected_index + 1 >= self.messages.len() {
            self.selected_index = self.messages.len().saturating_sub(1);
        }
    }

    pub fn set_counters(&mut self, counters: PipelineCounters) {
        self.errors = counters.errors;
        self.stats = counters.stats;
    }

    pub fn move_down(&mut self) {
        if self.selected_index + 1 < self.messages.len() {
            self.selected_index += 1;
        }
    }

    pub fn move_up(&mut self) {
        self.selected_index = self.selected_index.saturating_sub(1);
    }

    pub fn selected(&self) -> Option<&HttpMessageRecord> {
        self.messages.get(self.selected_index)
    }
}
