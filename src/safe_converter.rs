pub trait SafeCast<T> {
    fn safe_cast(self) -> T;
}

impl SafeCast<usize> for u8 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<usize> for u16 {
    fn safe_cast(self) -> usize {
        self as usize
    }
}

impl SafeCast<u64> for u16 {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}

impl SafeCast<u64> for usize {
    fn safe_cast(self) -> u64 {
        self as u64
    }
}


/// For narrowing casts where business logic ensures that the value is in the narrower type's range.
/// NB: The implementations will panic otherwise
pub trait PrecheckedCast<T> {
    fn prechecked_cast(self) -> T;
}
impl PrecheckedCast<u8> for usize {
    fn prechecked_cast(self) -> u8 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}
impl PrecheckedCast<u16> for usize {
    fn prechecked_cast(self) -> u16 {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}
impl PrecheckedCast<usize> for u64 {
    fn prechecked_cast(self) -> usize {
        self.try_into().expect("this is a bug: application logic should have ensured the value range")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prechecked_in_range() {
        let x: u8 = 255usize.prechecked_cast();
        assert_eq!(x, 255);
        let y: u16 = 65535usize.prechecked_cast();
        assert_eq!(y, 65535);
        let z: usize = 32767u64.prechecked_cast();
        assert_eq!(z, 32767);
    }

    #[test]
    #[should_panic]
    fn test_prechecked_out_of_range() {
        let _: u8 = 256usize.prechecked_cast();
    }
}
