use crate::core::{block::Block, state::StateError};

/// Persistent block storage. Key = decimal string of the block number,
/// value = the JSON-encoded block, so external tooling can read the store.
pub struct BlockStore {
    tree: sled::Tree,
}

impl BlockStore {
    pub fn new(tree: sled::Tree) -> BlockStore {
        BlockStore { tree }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn put(&self, block: &Block) -> Result<(), StateError> {
        self.tree.insert(
            block.block_number.to_string().as_bytes(),
            serde_json::to_vec(block)?,
        )?;
        Ok(())
    }

    pub fn get(&self, block_number: u64) -> Result<Option<Block>, StateError> {
        match self.tree.get(block_number.to_string().as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Highest stored block number. Decimal keys do not sort numerically
    /// under sled's byte order, so scan rather than take the last key.
    pub fn max_block_number(&self) -> Result<Option<u64>, StateError> {
        let mut max = None;
        for item in self.tree.iter() {
            let (key, _) = item?;
            if let Ok(number) = String::from_utf8_lossy(&key).parse::<u64>() {
                max = Some(max.map_or(number, |m: u64| m.max(number)));
            }
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params;

    fn temp_store() -> (sled::Db, BlockStore) {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("temporary sled db");
        let store = BlockStore::new(db.open_tree("blocks").unwrap());
        (db, store)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_db, store) = temp_store();
        let genesis = params::genesis_block();
        store.put(&genesis).unwrap();
        assert_eq!(store.get(0).unwrap().unwrap(), genesis);
        assert!(store.get(1).unwrap().is_none());
    }

    #[test]
    fn max_block_number_is_numeric_not_lexicographic() {
        let (_db, store) = temp_store();
        let mut block = params::genesis_block();
        for number in [0u64, 2, 10] {
            block.block_number = number;
            store.put(&block).unwrap();
        }
        // "10" < "2" in byte order; the scan must still find 10
        assert_eq!(store.max_block_number().unwrap(), Some(10));
    }
}
