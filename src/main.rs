use std::sync::Arc;

use strata::buffer::BufferPoolManager;
use strata::concurrency::Transaction;
use strata::index::{BPlusTree, GenericKey, Int64Comparator};
use strata::storage::disk::DiskManager;
use strata::{PageId, RecordId, SlotId};

fn main() {
    println!("Strata - a disk-oriented storage engine core");
    println!("============================================\n");

    let db_path = "demo.db";

    let disk_manager = Arc::new(DiskManager::new(db_path).expect("failed to create disk manager"));
    println!("Created disk manager for: {}", db_path);

    let bpm = Arc::new(BufferPoolManager::new(64, 2, disk_manager));
    println!("Created buffer pool manager with 64 frames\n");

    let tree =
        BPlusTree::new("demo_index", bpm, Int64Comparator, 16, 16).expect("failed to open index");

    let mut txn = Transaction::new();
    for key in [42i64, 7, 19, 3, 88, 56, 23, 71, 11, 64] {
        let rid = RecordId::new(PageId::new(key as u32), SlotId::new(0));
        tree.insert(&GenericKey::from_i64(key), rid, &mut txn)
            .expect("insert failed");
        println!("Inserted key {}", key);
    }

    println!("\nPoint lookups:");
    for key in [7i64, 42, 100] {
        match tree.get(&GenericKey::from_i64(key)).expect("lookup failed") {
            Some(rid) => println!("  key {} -> record {}", key, rid),
            None => println!("  key {} -> not found", key),
        }
    }

    println!("\nFull scan in key order:");
    for entry in tree.iter().expect("failed to build iterator") {
        let (key, rid) = entry.expect("scan failed");
        println!("  {} -> {}", key.as_i64(), rid);
    }

    tree.remove(&GenericKey::from_i64(42), &mut txn)
        .expect("remove failed");
    println!("\nRemoved key 42; lookup now: {:?}", {
        tree.get(&GenericKey::from_i64(42)).expect("lookup failed")
    });

    std::fs::remove_file(db_path).ok();
    println!("\nDemo completed successfully!");
}
