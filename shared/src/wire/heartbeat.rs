/// Liveness bookkeeping of one connection.
///
/// Each side increments its own counter once per interval and echoes the last
/// counter it received. The gap between the local counter and the echo of it coming
/// back tells how many intervals the counterpart has been silent.
#[derive(Clone, Debug)]
pub struct Heartbeat {
    current_timestamp: i32,
    counterpart_timestamp: i32,
    counterpart_notion_timestamp: i32,
    max_delay: i32,
}

/// Outcome of one heartbeat period
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatTick {
    pub alive: bool,
    pub timestamp: i32,
    pub counterpart: i32,
}

impl Heartbeat {
    pub fn new(max_delay: i32) -> Self {
        Self {
            current_timestamp: 0,
            counterpart_timestamp: 0,
            counterpart_notion_timestamp: 0,
            max_delay,
        }
    }

    pub fn is_established(&self) -> bool {
        self.current_timestamp
            .wrapping_sub(self.counterpart_notion_timestamp)
            <= self.max_delay
    }

    /// Liveness check plus the ping to send, then advances the local counter
    pub fn tick(&mut self) -> HeartbeatTick {
        let tick = HeartbeatTick {
            alive: self.is_established(),
            timestamp: self.current_timestamp,
            counterpart: self.counterpart_timestamp,
        };
        self.current_timestamp = self.current_timestamp.wrapping_add(1);
        tick
    }

    /// Records a received ping, returns whether the connection looks alive
    pub fn on_ping(&mut self, timestamp: i32, counterpart: i32) -> bool {
        self.counterpart_timestamp = timestamp;
        self.counterpart_notion_timestamp = counterpart;
        self.is_established()
    }
}
