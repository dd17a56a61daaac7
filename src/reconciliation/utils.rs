use std::fmt::Display;

use ledgerplan_types::Address;

/// `"<label> has been changed from <old> to <new>"` when the values differ.
pub fn compare<T: PartialEq + Display>(label: &str, old: &T, new: &T) -> Option<String> {
    if old == new {
        None
    } else {
        Some(format!("{} has been changed from {} to {}", label, old, new))
    }
}

/// Bytecode without its trailing CBOR metadata. The last two bytes of
/// compiled bytecode hold the metadata length.
pub fn strip_metadata(bytecode: &str) -> String {
    let hex = bytecode
        .trim()
        .trim_start_matches("0x")
        .to_ascii_lowercase();
    if hex.len() < 4 {
        return hex;
    }
    let (body, length) = hex.split_at(hex.len() - 4);
    match usize::from_str_radix(length, 16) {
        Ok(metadata_len) if metadata_len * 2 <= body.len() => {
            body[..body.len() - metadata_len * 2].to_string()
        }
        _ => hex,
    }
}

pub fn bytecodes_equal(old: &str, new: &str) -> bool {
    strip_metadata(old) == strip_metadata(new)
}

/// Sender comparison. A future without an explicit sender keeps whatever
/// account it was executed with.
pub fn compare_from(
    explicit: bool,
    old: &Address,
    new: &Address,
    accounts: &[Address],
) -> Option<String> {
    if !explicit && accounts.contains(old) {
        return None;
    }
    compare("From account", old, new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_is_ignored() {
        // body "6080" + metadata "aabb" + length 0x0002
        assert!(bytecodes_equal("0x6080aabb0002", "0x6080ccdd0002"));
        assert!(!bytecodes_equal("0x6080aabb0002", "0x6081aabb0002"));
        assert_eq!(strip_metadata("0x60"), "60");
    }

    #[test]
    fn test_implicit_sender_may_change() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        assert_eq!(compare_from(false, &a, &b, &[a, b]), None);
        assert!(compare_from(true, &a, &b, &[a, b]).is_some());
        assert!(compare_from(false, &a, &b, &[b]).is_some());
    }
}
