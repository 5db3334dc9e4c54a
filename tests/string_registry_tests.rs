use chronicle::string_registry::{generation, string_blocks};
use chronicle::{get_string, register_string, StringResolver, StringTable};
use std::thread;

static TEST_STR: &str = "Test string";
static DUPLICATE_STR: &str = "Duplicate string";
static CONCURRENT_STR: &str = "Concurrent string";
static UNICODE_STR: &str = "Hello, 世界! 🌍";

#[test]
fn test_string_registration() {
    let address = register_string(TEST_STR);
    assert_eq!(get_string(address).unwrap(), TEST_STR);
}

#[test]
fn test_duplicate_registration() {
    let address1 = register_string(DUPLICATE_STR);
    let address2 = register_string(DUPLICATE_STR);
    assert_eq!(address1, address2, "Same string should get same address");
}

#[test]
fn test_multiple_strings() {
    static STRINGS: [&str; 3] = ["First", "Second", "Third"];
    let addresses: Vec<_> = STRINGS.iter().map(|s| register_string(s)).collect();

    for i in 0..addresses.len() {
        for j in i + 1..addresses.len() {
            assert_ne!(addresses[i], addresses[j], "Different strings should get different addresses");
        }
    }

    for (s, address) in STRINGS.iter().zip(addresses.iter()) {
        assert_eq!(get_string(*address).unwrap(), *s);
    }
}

#[test]
fn test_invalid_address() {
    assert!(get_string(0).is_none(), "Unknown address should return None");
}

#[test]
fn test_concurrent_registration() {
    let handle = thread::spawn(|| register_string(CONCURRENT_STR));

    let address1 = register_string(CONCURRENT_STR);
    let address2 = handle.join().unwrap();

    assert_eq!(address1, address2, "Same string registered concurrently should get same address");
    assert_eq!(get_string(address1).unwrap(), CONCURRENT_STR);
}

#[test]
fn test_long_string() {
    let long_str = "a".repeat(200_000);
    let address = register_string(&long_str);
    assert_eq!(get_string(address).unwrap(), long_str);
}

#[test]
fn test_unicode_string() {
    let address = register_string(UNICODE_STR);
    assert_eq!(get_string(address).unwrap(), UNICODE_STR);
}

#[test]
fn test_generation_grows_with_new_strings() {
    let before = generation();
    register_string("generation probe string");
    assert!(generation() > before);

    let settled = generation();
    register_string("generation probe string");
    // Other tests may register concurrently, so only check it never goes back.
    assert!(generation() >= settled);
}

#[test]
fn test_blocks_resolve_through_string_table() {
    let hello = register_string("block resolution: hello");
    let empty = register_string("");

    let blocks = string_blocks();
    let table = StringTable::from_blocks(blocks.iter().map(|b| (b.address, &b.bytes[..])));

    assert_eq!(table.resolve(hello), Some("block resolution: hello"));
    assert_eq!(table.resolve(empty), Some(""));
    assert!(!table.is_empty());
}

#[test]
fn test_block_descriptors_match_contents() {
    register_string("descriptor check");
    for block in string_blocks() {
        let descriptor = block.descriptor();
        assert_eq!(descriptor.start, block.address);
        assert_eq!(descriptor.size, block.bytes.len() as u64);
        assert_eq!(block.bytes.last(), Some(&0), "Tables end on a terminator");
    }
}

#[test]
fn test_string_table_offsets() {
    let mut table = StringTable::new();
    table.insert_block(0x4000, b"one\0two\0\0three\0");

    assert_eq!(table.resolve(0x4000), Some("one"));
    assert_eq!(table.resolve(0x4004), Some("two"));
    assert_eq!(table.resolve(0x4008), Some(""));
    assert_eq!(table.resolve(0x4009), Some("three"));
    assert_eq!(table.resolve(0x4001), None, "Only string starts resolve");
}

#[test]
fn test_string_table_skips_invalid_utf8() {
    let table = StringTable::from_blocks([(0x10u64, &b"ok\0\xff\xfe\0"[..])]);
    assert_eq!(table.resolve(0x10), Some("ok"));
    assert_eq!(table.resolve(0x13), None);
}

#[test]
fn test_string_table_near_address_space_end() {
    let mut table = StringTable::new();
    table.insert_block(u64::MAX - 2, b"ab\0cd\0");
    assert_eq!(table.resolve(u64::MAX - 2), Some("ab"));
    assert_eq!(table.len(), 1, "Pieces past the last address are dropped");
}
