// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Masking helpers for personal data stored in audit records
//
// All functions work on characters, not bytes, and map the empty string to
// itself.

const MASK: &str = "****";

/// Mask a phone number or email address according to its delivery channel
pub fn mask_destination(destination: &str, channel: &str) -> String {
    if destination.is_empty() {
        return String::new();
    }

    match channel {
        "sms" | "phone" => mask_phone(destination),
        "email" => mask_email(destination),
        _ => MASK.to_string(),
    }
}

/// `user@example.com` -> `u***@example.com`
pub fn mask_email(email: &str) -> String {
    if email.is_empty() {
        return String::new();
    }

    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        _ => MASK.to_string(),
    }
}

/// Keep the first 3 and last 4 characters: `13800138000` -> `138****8000`
pub fn mask_phone(phone: &str) -> String {
    if phone.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = phone.chars().collect();
    if chars.len() <= 7 {
        return MASK.to_string();
    }

    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 7), tail)
}

/// Keep the first and last IPv4 octet; long non-IPv4 strings keep 4 chars each side
pub fn mask_ip(ip: &str) -> String {
    if ip.is_empty() {
        return String::new();
    }

    if let (Some(first_dot), Some(last_dot)) = (ip.find('.'), ip.rfind('.')) {
        if ip.len() >= 7 && first_dot != last_dot {
            return format!("{}***{}", &ip[..=first_dot], &ip[last_dot..]);
        }
    }

    let chars: Vec<char> = ip.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        return format!("{}{}{}", head, MASK, tail);
    }

    MASK.to_string()
}

/// Keep `keep` characters at each end, or mask entirely if too short
pub fn mask_string(s: &str, keep: usize) -> String {
    if s.is_empty() {
        return String::new();
    }

    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= keep * 2 {
        return MASK.to_string();
    }

    let head: String = chars[..keep].iter().collect();
    let tail: String = chars[chars.len() - keep..].iter().collect();
    format!("{}{}{}", head, MASK, tail)
}
