// ABOUTME: Tabular output helper for ls/status listings.
// ABOUTME: Left-aligns columns to the widest cell, two-space separated.

pub fn align_columns(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows.iter().map(|row| row.len()).max().unwrap_or(0);
    let mut widths = vec![0usize; columns];
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    rows.iter()
        .map(|row| {
            let line = row
                .iter()
                .enumerate()
                .map(|(i, cell)| format!("{cell:<width$}", width = widths[i]))
                .collect::<Vec<_>>()
                .join("  ");
            line.trim_end().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_line_up() {
        let rows = vec![
            vec!["NAME".to_string(), "VERSION".to_string()],
            vec!["demo".to_string(), "1.2.3-longer".to_string()],
        ];
        let lines = align_columns(&rows);
        assert_eq!(lines[0], "NAME  VERSION");
        assert_eq!(lines[1], "demo  1.2.3-longer");
    }

    #[test]
    fn empty_input_yields_no_lines() {
        assert!(align_columns(&[]).is_empty());
    }
}
