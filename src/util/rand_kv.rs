use bytes::Bytes;
use rand::Rng;

/// Deterministic test key, zero-padded so keys sort in numeric order.
pub fn get_test_key(i: usize) -> Bytes {
  Bytes::from(format!("cinder-kv-key-{:09}", i))
}

pub fn get_test_value(i: usize) -> Bytes {
  Bytes::from(format!("cinder-kv-value-value-value-{:09}", i))
}

/// `n` random bytes, for payloads where content does not matter.
pub fn random_value(n: usize) -> Bytes {
  let mut buf = vec![0u8; n];
  rand::rng().fill(&mut buf[..]);
  Bytes::from(buf)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_test_key_value() {
    for i in 0..10 {
      assert!(!get_test_key(i).is_empty());
      assert!(!get_test_value(i).is_empty());
    }
    assert!(get_test_key(1) < get_test_key(2));
    assert!(get_test_key(9) < get_test_key(10));
  }

  #[test]
  fn test_random_value() {
    assert_eq!(random_value(128).len(), 128);
    assert!(random_value(0).is_empty());
  }
}
