/// Number of addressable ME clients.
pub const MAX_CLIENTS: usize = 256;

/// One bit per ME client address, as reported by the enumeration response.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ClientBitmap([u8; MAX_CLIENTS / 8]);

impl ClientBitmap {
    pub const BYTES: usize = MAX_CLIENTS / 8;

    #[must_use]
    pub const fn from_bytes(bytes: [u8; Self::BYTES]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; Self::BYTES] {
        &self.0
    }

    pub const fn set(&mut self, address: u8) {
        self.0[address as usize / 8] |= 1 << (address % 8);
    }

    #[must_use]
    pub const fn contains(&self, address: u8) -> bool {
        self.0[address as usize / 8] & (1 << (address % 8)) != 0
    }

    /// The lowest set address that is `>= from`.
    #[must_use]
    pub fn next_set(&self, from: usize) -> Option<u8> {
        (from..MAX_CLIENTS)
            .filter_map(|bit| u8::try_from(bit).ok())
            .find(|&address| self.contains(address))
    }

    /// Set addresses in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(|&address| self.contains(address))
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }
}

impl FromIterator<u8> for ClientBitmap {
    fn from_iter<T: IntoIterator<Item = u8>>(iter: T) -> Self {
        let mut map = Self::default();
        for address in iter {
            map.set(address);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_set_walks_in_ascending_order() {
        let map: ClientBitmap = [40, 5, 12].into_iter().collect();
        assert_eq!(map.next_set(0), Some(5));
        assert_eq!(map.next_set(6), Some(12));
        assert_eq!(map.next_set(13), Some(40));
        assert_eq!(map.next_set(41), None);
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![5, 12, 40]);
        assert_eq!(map.count(), 3);
    }

    #[test]
    fn highest_address_and_past_the_end() {
        let map: ClientBitmap = [255].into_iter().collect();
        assert_eq!(map.next_set(0), Some(255));
        assert_eq!(map.next_set(256), None);
        assert_eq!(map.as_bytes()[31], 0x80);
    }

    #[test]
    fn empty_map() {
        assert_eq!(ClientBitmap::default().next_set(0), None);
        assert_eq!(ClientBitmap::default().count(), 0);
    }
}
