use std::collections::HashMap;

// ---------------------------------------------
// SPAWN RESULT RETURNED TO PHYSICS + NET
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnPoint {
    pub slot: usize,
    pub position: [f32; 2], // x, z; height comes from the terrain
    pub heading: f32,       // yaw, rad
}

// ---------------------------------------------
// SLOT-BASED SPAWN ALLOCATOR
// ---------------------------------------------
#[derive(Debug)]
pub struct SpawnManager {
    /// Which player holds each slot
    slots: Vec<Option<String>>,
    /// Metres between neighbouring slots
    spacing: f32,
    by_player: HashMap<String, usize>,
}

impl SpawnManager {
    pub fn new(max_players: usize, spacing: f32) -> Self {
        Self {
            slots: vec![None; max_players.max(1)],
            spacing,
            by_player: HashMap::new(),
        }
    }

    // ---------------------------------------------------------
    // Full allocation pipeline called from physics.rs
    // ---------------------------------------------------------
    pub fn allocate_spawn(&mut self, player_id: &str) -> SpawnPoint {
        if let Some(&slot) = self.by_player.get(player_id) {
            return self.point(slot);
        }

        // first free slot, or grow the line when every slot is taken
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.slots[slot] = Some(player_id.to_string());
        self.by_player.insert(player_id.to_string(), slot);
        self.point(slot)
    }

    pub fn release(&mut self, player_id: &str) {
        if let Some(slot) = self.by_player.remove(player_id) {
            self.slots[slot] = None;
        }
    }

    pub fn occupied(&self) -> usize {
        self.by_player.len()
    }

    // Slots alternate left/right of the origin: 0, +s, -s, +2s, ...
    fn point(&self, slot: usize) -> SpawnPoint {
        let rank = slot.div_ceil(2) as f32;
        let side = if slot % 2 == 1 { 1.0 } else { -1.0 };
        SpawnPoint {
            slot,
            position: [side * rank * self.spacing, 0.0],
            heading: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_are_reused_after_release() {
        let mut spawns = SpawnManager::new(2, 8.0);
        let a = spawns.allocate_spawn("a");
        let b = spawns.allocate_spawn("b");
        assert_eq!((a.slot, b.slot), (0, 1));
        assert_eq!(a.position, [0.0, 0.0]);
        assert_eq!(b.position, [8.0, 0.0]);

        spawns.release("a");
        assert_eq!(spawns.allocate_spawn("c").slot, 0);
        assert_eq!(spawns.occupied(), 2);
    }

    #[test]
    fn full_line_grows_and_repeat_allocation_is_stable() {
        let mut spawns = SpawnManager::new(1, 8.0);
        spawns.allocate_spawn("a");
        let b = spawns.allocate_spawn("b");
        assert_eq!(b.slot, 1);
        assert_eq!(spawns.allocate_spawn("b"), b);
        assert_eq!(spawns.allocate_spawn("c").position, [-8.0, 0.0]);
    }
}
