use crate::chunk::Chunk;

/// Program memory owned by one engine. Tracks whether any cell was written
/// since the last time a caller took the dirty flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramMemory {
    cells: Vec<Chunk>,
    dirty: bool,
}

impl ProgramMemory {
    pub fn new(cells: Vec<Chunk>) -> Self {
        Self {
            cells,
            dirty: false,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn read(&self, addr: usize) -> Option<Chunk> {
        self.cells.get(addr).copied()
    }

    /// Returns `false` without touching memory when `addr` is out of range.
    pub fn write(&mut self, addr: usize, chunk: Chunk) -> bool {
        match self.cells.get_mut(addr) {
            Some(cell) => {
                *cell = chunk;
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub fn as_slice(&self) -> &[Chunk] {
        &self.cells
    }

    pub fn to_vec(&self) -> Vec<Chunk> {
        self.cells.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_mark_memory_dirty_once() {
        let mut memory = ProgramMemory::new(vec![1, 2, 3]);
        assert!(!memory.take_dirty());
        assert!(memory.write(1, 81));
        assert_eq!(memory.read(1), Some(81));
        assert!(memory.take_dirty());
        assert!(!memory.take_dirty());
    }

    #[test]
    fn out_of_range_write_is_rejected() {
        let mut memory = ProgramMemory::new(vec![1]);
        assert!(!memory.write(5, 81));
        assert!(!memory.take_dirty());
        assert_eq!(memory.read(5), None);
    }
}
