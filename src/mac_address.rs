use std::fmt;
use std::str::FromStr;

/// MACアドレスのパースエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacAddressError {
    #[error("MACアドレスの形式が不正です: '{0}' (xx:xx:xx:xx:xx:xx 形式で指定してください)")]
    InvalidFormat(String),
    #[error("16進数として解析できません: '{0}'")]
    InvalidHex(String),
    #[error("MACアドレスの長さが不正です: {0} bytes")]
    InvalidLength(usize),
}

/// ESP-NOW ピアの 6 バイトリンク層アドレス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub(crate) [u8; 6]);

impl MacAddress {
    /// バイト配列からMACアドレスを作成
    pub const fn new(addr: [u8; 6]) -> Self {
        MacAddress(addr)
    }

    /// 受信コールバックで渡される任意長スライスから作成します
    pub fn from_slice(bytes: &[u8]) -> Result<Self, MacAddressError> {
        let addr: [u8; 6] = bytes
            .try_into()
            .map_err(|_| MacAddressError::InvalidLength(bytes.len()))?;
        Ok(MacAddress(addr))
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl FromStr for MacAddress {
    type Err = MacAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(MacAddressError::InvalidFormat(s.to_string()));
        }

        let mut mac = [0u8; 6];
        for (slot, part) in mac.iter_mut().zip(parts.iter()) {
            if part.len() != 2 {
                return Err(MacAddressError::InvalidFormat(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| MacAddressError::InvalidHex(part.to_string()))?;
        }

        Ok(MacAddress(mac))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}
