use std::time;

pub static SMALL_DELAY: time::Duration = time::Duration::from_millis(200);

pub static EMAIL_BASIC: &[u8] = b"From: alice@example.com\r
To: alice@example.tld\r
Subject: Test\r
\r
Hello world!\r
";

pub static EMAIL_MULTIPART: &[u8] = b"Date: Sat, 8 Jul 2023 07:14:29 +0200\r
From: Bob Robert <bob@example.tld>\r
To: Alice Malice <alice@example.tld>\r
Subject: multipart test\r
MIME-Version: 1.0\r
Content-Type: multipart/alternative;\r
 boundary=\"b1_e376dc71bafc953c0b0fdeb9983a9956\"\r
\r
This is a multi-part message in MIME format.\r
\r
--b1_e376dc71bafc953c0b0fdeb9983a9956\r
Content-Type: text/plain; charset=utf-8\r
\r
OoOoO\r
oOoOoOoOo\r
\r
--b1_e376dc71bafc953c0b0fdeb9983a9956\r
Content-Type: text/html; charset=us-ascii\r
\r
<div>OoOoO<br />oOoOoOoOo</div>\r
\r
--b1_e376dc71bafc953c0b0fdeb9983a9956--\r
";
