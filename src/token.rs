use crate::constants::{
    BOS_ID, BOS_SYMBOL, EOS_ID, EOS_SYMBOL, PAD_ID, PAD_SYMBOL, UNK_ID, UNK_SYMBOL,
};
use crate::error::{DataError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;
use tokenizers::models::wordlevel::WordLevel;
use tokenizers::Tokenizer;

pub type Sequence = Vec<i32>;

/// Token to id lookup backed by a `tokenizers` JSON file.
///
/// Building the vocabulary is not this crate's job; it only checks that the
/// special symbols sit on the ids the batching code relies on.
pub struct Vocabulary {
    tokenizer: Tokenizer,
}

impl Vocabulary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| DataError::Vocabulary(format!("{}: {e}", path.display())))?;
        Self::from_tokenizer(tokenizer)
    }

    /// Word-level vocabulary from an explicit token → id map.
    pub fn from_ids(vocab: HashMap<String, u32>) -> Result<Self> {
        let model = WordLevel::builder()
            .vocab(vocab)
            .unk_token(UNK_SYMBOL.to_string())
            .build()
            .map_err(|e| DataError::Vocabulary(e.to_string()))?;
        Self::from_tokenizer(Tokenizer::new(model))
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> Result<Self> {
        for (symbol, id) in [
            (PAD_SYMBOL, PAD_ID),
            (UNK_SYMBOL, UNK_ID),
            (BOS_SYMBOL, BOS_ID),
            (EOS_SYMBOL, EOS_ID),
        ] {
            let found = tokenizer.token_to_id(symbol);
            if found != Some(id as u32) {
                return Err(DataError::Vocabulary(format!(
                    "{symbol} must have id {id}, found {found:?}"
                )));
            }
        }
        Ok(Self { tokenizer })
    }

    pub fn size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }

    pub fn id(&self, token: &str) -> i32 {
        self.tokenizer
            .token_to_id(token)
            .map_or(UNK_ID, |id| id as i32)
    }
}

pub fn tokens2ids<'t>(tokens: impl IntoIterator<Item = &'t str>, vocab: &Vocabulary) -> Sequence {
    tokens.into_iter().map(|token| vocab.id(token)).collect()
}

pub fn strids2ids<'t>(tokens: impl IntoIterator<Item = &'t str>) -> Result<Sequence> {
    tokens
        .into_iter()
        .map(|token| {
            token
                .parse()
                .map_err(|_| DataError::Vocabulary(format!("'{token}' is not an integer id")))
        })
        .collect()
}

/// Reads a corpus file, one encoded sentence per line.
///
/// Empty lines yield `None` so that the pairing step can drop the sentence pair
/// while keeping the line counts of parallel files aligned.
pub struct SequenceReader<'v> {
    lines: Lines<BufReader<File>>,
    vocabulary: Option<&'v Vocabulary>,
    add_bos: bool,
    add_eos: bool,
}

impl<'v> SequenceReader<'v> {
    pub fn new(
        path: impl AsRef<Path>,
        vocabulary: Option<&'v Vocabulary>,
        add_bos: bool,
        add_eos: bool,
    ) -> Result<Self> {
        if vocabulary.is_none() && (add_bos || add_eos) {
            return Err(DataError::Vocabulary(
                "Adding a BOS or EOS symbol requires a vocabulary".to_string(),
            ));
        }
        Ok(Self {
            lines: BufReader::new(File::open(path.as_ref())?).lines(),
            vocabulary,
            add_bos,
            add_eos,
        })
    }

    fn encode(&self, line: &str) -> Result<Option<Sequence>> {
        let tokens = line.split_whitespace();
        let Some(vocabulary) = self.vocabulary else {
            let ids = strids2ids(tokens)?;
            return Ok((!ids.is_empty()).then_some(ids));
        };
        let ids = tokens2ids(tokens, vocabulary);
        if ids.is_empty() {
            return Ok(None);
        }
        let mut sequence = Vec::with_capacity(ids.len() + 2);
        if self.add_bos {
            sequence.push(BOS_ID);
        }
        sequence.extend(ids);
        if self.add_eos {
            sequence.push(EOS_ID);
        }
        Ok(Some(sequence))
    }
}

impl Iterator for SequenceReader<'_> {
    type Item = Result<Option<Sequence>>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        Some(line.map_err(DataError::from).and_then(|l| self.encode(&l)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn test_vocabulary(words: &[&str]) -> Vocabulary {
        let mut ids: HashMap<String, u32> = [PAD_SYMBOL, UNK_SYMBOL, BOS_SYMBOL, EOS_SYMBOL]
            .iter()
            .enumerate()
            .map(|(i, s)| (s.to_string(), i as u32))
            .collect();
        for word in words {
            let next = ids.len() as u32;
            ids.entry(word.to_string()).or_insert(next);
        }
        Vocabulary::from_ids(ids).unwrap()
    }

    #[test]
    fn test_tokens2ids() {
        let vocab = test_vocabulary(&["a", "b", "c"]);
        assert_eq!(tokens2ids(["a", "x", "c"], &vocab), vec![4, UNK_ID, 6]);
        assert_eq!(vocab.size(), 7);
    }

    #[test]
    fn test_strids2ids() {
        assert_eq!(strids2ids(["1", "2", "3", "0"]).unwrap(), vec![1, 2, 3, 0]);
        assert_eq!(strids2ids([]).unwrap(), Vec::<i32>::new());
        assert!(strids2ids(["a"]).is_err());
    }

    #[test]
    fn test_rejects_misplaced_special_symbols() {
        let ids: HashMap<String, u32> = [(UNK_SYMBOL, 0), (PAD_SYMBOL, 1), (BOS_SYMBOL, 2), (EOS_SYMBOL, 3)]
            .into_iter()
            .map(|(s, i)| (s.to_string(), i))
            .collect();
        assert!(matches!(Vocabulary::from_ids(ids), Err(DataError::Vocabulary(_))));
    }

    #[test]
    fn test_sequence_reader() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "a b c\n\nc")?;

        let vocab = test_vocabulary(&["a", "b", "c"]);
        let read = SequenceReader::new(file.path(), Some(&vocab), true, true)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(
            read,
            vec![Some(vec![BOS_ID, 4, 5, 6, EOS_ID]), None, Some(vec![BOS_ID, 6, EOS_ID])]
        );

        let read = SequenceReader::new(file.path(), Some(&vocab), false, false)?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(read, vec![Some(vec![4, 5, 6]), None, Some(vec![6])]);
        Ok(())
    }

    #[test]
    fn test_sequence_reader_without_vocabulary() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "1 2 3\n2\n\n2 2 2")?;
        let read = SequenceReader::new(file.path(), None, false, false)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(read, vec![Some(vec![1, 2, 3]), Some(vec![2]), None, Some(vec![2, 2, 2])]);

        let err = SequenceReader::new(file.path(), None, true, false).err().unwrap();
        assert_eq!(
            err.to_string(),
            "vocabulary error: Adding a BOS or EOS symbol requires a vocabulary"
        );
        Ok(())
    }
}
