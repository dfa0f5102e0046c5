use std::io::{Read, Write};

use indicatif::ProgressStyle;

/// 默认的进度条样式
pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// 从标准输入读取一行
pub fn read_line(prompt: &str) -> anyhow::Result<String> {
    print!("{}", prompt);
    std::io::stdout().flush()?;
    let v = std::io::stdin()
        .bytes()
        .take_while(|c| c.as_ref().ok() != Some(&b'\n'))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf8(v)?.trim().to_owned())
}

/// 询问用户是否继续，只有输入 y 或 yes 才返回 true
pub fn confirm(prompt: &str) -> anyhow::Result<bool> {
    let answer = read_line(&format!("{prompt} [y/N] "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}
