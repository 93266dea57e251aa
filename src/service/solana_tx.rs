// Solana legacy 交易编码
// 只支持单条 System Program Transfer 指令
//
// Message 布局：
//   header(3) | compact(n) + keys(32*n) | recent_blockhash(32) | compact(m) + instructions
// Transaction 布局：
//   compact(sig_count) + signatures(64*k) | message

use crate::domain::AccountAddress;

/// System Program 的 Transfer 指令序号
const SYSTEM_TRANSFER_INDEX: u32 = 2;

/// 未签名的转账消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMessage {
    pub from: AccountAddress,
    pub to: AccountAddress,
    pub lamports: u64,
    pub recent_blockhash: [u8; 32],
}

impl TransferMessage {
    /// 序列化为待签名的消息字节
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + 1 + 32 * 3 + 32 + 1 + 1 + 1 + 2 + 1 + 12);

        // header: 1 个签名者，0 个只读签名者，1 个只读非签名者（System Program）
        out.extend_from_slice(&[1, 0, 1]);

        // 账户顺序：from(签名+可写), to(可写), system program(只读)
        encode_compact_u16(&mut out, 3);
        out.extend_from_slice(self.from.as_bytes());
        out.extend_from_slice(self.to.as_bytes());
        out.extend_from_slice(AccountAddress::SYSTEM_PROGRAM.as_bytes());

        out.extend_from_slice(&self.recent_blockhash);

        // 单条指令
        encode_compact_u16(&mut out, 1);
        out.push(2); // program_id 索引
        encode_compact_u16(&mut out, 2);
        out.extend_from_slice(&[0, 1]);

        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&SYSTEM_TRANSFER_INDEX.to_le_bytes());
        data.extend_from_slice(&self.lamports.to_le_bytes());
        encode_compact_u16(&mut out, data.len() as u16);
        out.extend_from_slice(&data);

        out
    }
}

/// 组装已签名交易的线上格式
pub fn encode_signed_transaction(signature: &[u8; 64], message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 64 + message.len());
    encode_compact_u16(&mut out, 1);
    out.extend_from_slice(signature);
    out.extend_from_slice(message);
    out
}

/// Solana 的 compact-u16（ShortVec）编码
pub fn encode_compact_u16(out: &mut Vec<u8>, mut value: u16) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}
